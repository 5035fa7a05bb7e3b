/// Default number of most recent strong blocks whose delta blocks are kept around.
pub const DEFAULT_TRACKED_STRONG_BLOCKS: usize = 4;

/// Default ratio between the weak and the strong proof-of-work target.
pub const DEFAULT_WEAK_POW_RATIO: u32 = 1000;

/// Configuration options for the delta block engine.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
pub struct DeltaBlocksOptions {
    /// Whether delta blocks are accepted, relayed and used for mining templates.
    #[cfg_attr(
        feature = "cli",
        arg(long = "deltablocks", default_value_t = true, action = clap::ArgAction::Set)
    )]
    pub enabled: bool,

    /// Number of recent strong blocks to track delta blocks for.
    #[cfg_attr(
        feature = "cli",
        arg(long = "deltablocks-tracked-strong-blocks", default_value_t = DEFAULT_TRACKED_STRONG_BLOCKS)
    )]
    pub tracked_strong_blocks: usize,

    /// How much easier the weak target is compared to the strong one.
    #[cfg_attr(
        feature = "cli",
        arg(long = "deltablocks-weak-pow-ratio", default_value_t = DEFAULT_WEAK_POW_RATIO)
    )]
    pub weak_pow_ratio: u32,
}

impl Default for DeltaBlocksOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            tracked_strong_blocks: DEFAULT_TRACKED_STRONG_BLOCKS,
            weak_pow_ratio: DEFAULT_WEAK_POW_RATIO,
        }
    }
}

impl DeltaBlocksOptions {
    /// Create new options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for configuring the options
    pub fn builder() -> DeltaBlocksOptionsBuilder {
        DeltaBlocksOptionsBuilder::default()
    }
}

/// Builder pattern for DeltaBlocksOptions
#[derive(Default)]
pub struct DeltaBlocksOptionsBuilder {
    options: DeltaBlocksOptions,
}

impl DeltaBlocksOptionsBuilder {
    /// Enable or disable the engine
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.options.enabled = enabled;
        self
    }

    /// Set the size of the strong block window. Zero is bumped to one.
    pub fn tracked_strong_blocks(mut self, n: usize) -> Self {
        self.options.tracked_strong_blocks = n.max(1);
        self
    }

    /// Set the weak to strong target ratio. Zero is bumped to one.
    pub fn weak_pow_ratio(mut self, ratio: u32) -> Self {
        self.options.weak_pow_ratio = ratio.max(1);
        self
    }

    /// Build the options
    pub fn build(self) -> DeltaBlocksOptions {
        self.options
    }
}
