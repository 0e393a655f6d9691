//! Inference backend adapters for kbchat.
//!
//! All adapters implement the `kbchat_core::Backend` trait.
//! [`BackendRouter`] builds exactly one of them from configuration and is the
//! only thing sessions talk to.

pub mod daemon;
pub mod hosted;
pub mod in_process;
#[cfg(feature = "local")]
pub mod local;
pub mod native;
pub mod router;
pub mod sampling;
pub mod shapes;

pub use daemon::LocalDaemonBackend;
pub use hosted::HostedApiBackend;
pub use in_process::{InProcessBackend, PipelineBuilder, TextGenerationPipeline};
pub use native::{
    ChatChoice, ChatCompletion, ChatCompletionModel, ChatModelLoader, NativeBindingBackend,
};
pub use router::{BackendRouter, degraded_reply};
pub use sampling::Sampling;
