#[cfg(feature = "cli")]
mod args;

#[cfg(feature = "elapsed")]
pub mod elapsed;

#[cfg(feature = "cli")]
pub use args::ConfigOverridesArgs;
#[cfg(feature = "cli")]
pub use args::OutputFormatArg;
#[cfg(feature = "cli")]
pub use args::PriorityArg;
