//! Map builder configuration.

/// Tunables for the stack pointer map builder.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Re-check joins on second arrival at a block.
    ///
    /// The builder interprets each block once; soundness rests on the
    /// bytecode being verified, so all predecessors of a block agree on
    /// operand-stack shape. With this set, the builder keeps each
    /// block's entry state and compares the reference kind of every
    /// slot when another predecessor arrives, turning a malformed join
    /// into a build error instead of a wrong map.
    ///
    /// Default: enabled in debug builds.
    pub verify_joins: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            verify_joins: cfg!(debug_assertions),
        }
    }
}
