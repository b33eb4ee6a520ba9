// Run loop module - hosts a thread-affine UI run loop next to the async host
//
// This module contains:
// - LoopContext / Dispatcher: shared loop state and the marshalling capability
// - Shell / ShellSet: top-level objects whose closing ends the loop
// - RunLoopToolkit / LoopScope: what a toolkit implements and may call
// - RunLoopThreadBridge: dedicated loop thread, startup and shutdown
// - RunLoopHostedComponent: the bridge as a hosted service
// - QueueToolkit: a headless loop fed by a bounded callback queue

pub mod bridge;
pub mod context;
pub mod hosted;
pub mod queue;
pub mod shell;
pub mod toolkit;

pub use bridge::{RunLoopOptions, RunLoopThreadBridge};
pub use context::{Dispatcher, LoopCallback, LoopContext};
pub use hosted::RunLoopHostedComponent;
pub use queue::{QueueContext, QueueDispatcher, QueueToolkit};
pub use shell::{
    HeadlessShell, Shell, ShellCloseResult, ShellFactory, ShellMode, ShellSet, ShutdownReport,
};
pub use toolkit::{LoopInitializer, LoopScope, RunLoopToolkit};
