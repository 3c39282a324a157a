//! Dedicated render thread.

use std::thread::{self, JoinHandle};

use crate::errors::{LifecycleError, Result};
use crate::renderer::command::executor::{DrainReport, RenderContext};
use crate::renderer::command::{CommandSender, RenderCommand, command_queue};
use crate::renderer::device::RenderDevice;

/// Result of a stopped render thread.
pub struct RenderThreadExit<D: RenderDevice> {
    pub context: RenderContext<D>,
    /// Outcome of the command loop; the strict-validation error that stopped
    /// it, if any.
    pub result: Result<DrainReport>,
}

/// Runs a [`RenderContext`] on its own OS thread, fed by a command queue.
pub struct RenderThread<D: RenderDevice + 'static> {
    sender: CommandSender,
    handle: Option<JoinHandle<RenderThreadExit<D>>>,
}

impl<D: RenderDevice + 'static> RenderThread<D> {
    /// Moves `context` to a new thread named `render`.
    pub fn spawn(mut context: RenderContext<D>) -> Result<Self> {
        let (sender, receiver) = command_queue();
        let handle = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || {
                let result = context.run(&receiver);
                log::debug!("Render thread stopped");
                RenderThreadExit { context, result }
            })?;
        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    /// Producer end of the thread's queue.
    #[must_use]
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Blocks until every command enqueued before this call has executed.
    pub fn flush(&self) -> Result<()> {
        let (signal, done) = flume::bounded(1);
        self.sender.enqueue(RenderCommand::Fence(signal))?;
        done.recv()
            .map_err(|_| LifecycleError::RenderThreadDisconnected)
    }

    /// Executes the remaining queue, stops the thread and hands the context
    /// back.
    pub fn shutdown(mut self) -> Result<RenderThreadExit<D>> {
        // A thread that already stopped has dropped its receiver.
        let _ = self.sender.enqueue(RenderCommand::Shutdown);
        let handle = self
            .handle
            .take()
            .ok_or(LifecycleError::RenderThreadDisconnected)?;
        handle
            .join()
            .map_err(|_| LifecycleError::RenderThreadDisconnected)
    }
}

impl<D: RenderDevice + 'static> Drop for RenderThread<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.enqueue(RenderCommand::Shutdown);
            if handle.join().is_err() {
                log::error!("Render thread panicked");
            }
        }
    }
}
