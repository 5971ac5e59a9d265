use tokio::sync::watch;

/// Resolve once shutdown has been requested.
///
/// A dropped sender counts as a shutdown request, so tasks never outlive the
/// handle that owns them.
pub async fn requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
