/// Receives connection state changes of the client's server link.
pub trait ConnectionEventListener: Send + Sync {
    fn on_connected(&self);

    fn on_disconnect(&self);
}
