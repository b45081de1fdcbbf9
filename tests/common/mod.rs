//! Common test utilities and helpers

#![allow(dead_code)] // not every test binary uses every helper

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use vidflow::Blob;

static TRACING: Once = Once::new();

/// Install a fmt subscriber once per test binary. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Build a blob carrying one payload buffer, tagged with identity.
pub fn tagged_blob(stream_id: u32, frame_id: u64) -> Arc<Blob> {
    let mut blob = Blob::with_identity(stream_id, frame_id);
    blob.emplace(vec![frame_id as u8; 4], 4);
    blob.stamp_now();
    Arc::new(blob)
}

/// Build a blob whose single buffer bumps `counter` when released.
pub fn counting_release_blob(counter: Arc<AtomicUsize>) -> Arc<Blob> {
    let mut blob = Blob::with_identity(0, 0);
    blob.emplace_with_release::<u64, ()>(0xdead_beef, 1, None, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    Arc::new(blob)
}
