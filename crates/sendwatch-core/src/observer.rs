//! Observer callback trait.

/// Receives a notification when a tracked entity's projection changes.
///
/// The callback carries no payload; observers re-read whatever state they
/// need from the store.
pub trait Observer {
    /// Called once per change event in which the projection changed.
    fn on_change(&self);
}

impl<F> Observer for F
where
    F: Fn(),
{
    fn on_change(&self) {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_closure_observer() {
        let hits = Rc::new(Cell::new(0));
        let observer = {
            let hits = Rc::clone(&hits);
            move || hits.set(hits.get() + 1)
        };

        observer.on_change();
        observer.on_change();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_observer_as_trait_object() {
        let hits = Rc::new(Cell::new(0));
        let observer: Rc<dyn Observer> = {
            let hits = Rc::clone(&hits);
            Rc::new(move || hits.set(hits.get() + 1))
        };

        observer.on_change();
        assert_eq!(hits.get(), 1);
    }
}
