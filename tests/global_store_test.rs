//! The process-wide store handle.
//!
//! Runs in its own test binary since the handle is initialized once per
//! process.

use muxstore::{Error, Store};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_global_store_is_shared_and_not_reentrant() {
    let home = TempDir::new().unwrap();
    unsafe {
        std::env::set_var("MUXSTORE_HOME", home.path());
        std::env::remove_var("MUXSTORE_BUSY_TIMEOUT_MS");
    }

    let first = Store::global().unwrap();
    let second = Store::global().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.config().home, home.path());
    assert!(home.path().join("muxstore.db").exists());

    let inner = first.with_tx(|_tx| Ok(Store::global().map(|_| ())));
    assert!(matches!(inner, Ok(Err(Error::NestedTransaction))));

    let identity = first.ensure_identity().unwrap();
    assert_eq!(second.ensure_identity().unwrap().user_id, identity.user_id);
}
