//! Common surface of the bus-fed views.

/// A view built from committed events.
///
/// Views trail the store by however long the bus takes to deliver, so a
/// command never reads from one.
pub trait ReadModel: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Number of rows, or None while an update holds the view.
    fn count(&self) -> Option<usize>;
}
