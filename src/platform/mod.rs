//! Platform abstraction layer
//!
//! Handles browser/native differences for:
//! - Storage (localStorage/sessionStorage on web, in-memory natively)
//! - Task spawning (microtask queue on web, a `LocalPool` natively)

pub mod storage;

use futures::future::LocalBoxFuture;

/// Runs fire-and-forget tasks on the current thread.
///
/// Tasks run to completion; there is no cancellation.
pub trait Spawner {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>);
}

/// Spawns onto the browser event loop
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Copy, Default)]
pub struct WasmSpawner;

#[cfg(target_arch = "wasm32")]
impl Spawner for WasmSpawner {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}

impl Spawner for futures::executor::LocalSpawner {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        use futures::task::LocalSpawnExt;

        if let Err(e) = LocalSpawnExt::spawn_local(self, task) {
            log::error!("Failed to spawn task: {}", e);
        }
    }
}
