//! Per-context installed dispatcher.
//!
//! Components that cannot easily be handed a [`Dispatcher`] can reach the one
//! installed on the current thread. The slot is thread-local because a
//! dispatcher is bound to the context that created it.
//!
//! Using [`global_instance`] or [`add_observer`] before
//! [`setup_global_instance`] is a programming error and panics: without a
//! dispatcher every notification would be silently lost.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use tracing::{info, warn};

use crate::dispatcher::Dispatcher;
use crate::observer::Observer;
use crate::projector::Projector;
use crate::token::ObserverToken;

/// Type-erased view of an installed dispatcher.
trait Installed {
    fn as_any(&self) -> &dyn Any;
    fn teardown(&self);
}

impl<P: Projector + 'static> Installed for Dispatcher<P> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn teardown(&self) {
        Dispatcher::teardown(self);
    }
}

thread_local! {
    static INSTANCE: RefCell<Option<Box<dyn Installed>>> = const { RefCell::new(None) };
}

/// Install `dispatcher` for the current thread, replacing any previous one.
pub fn setup_global_instance<P: Projector + 'static>(dispatcher: Dispatcher<P>) {
    let previous = INSTANCE.with(|slot| slot.borrow_mut().replace(Box::new(dispatcher)));

    if let Some(previous) = previous {
        warn!("replacing installed dispatcher");
        previous.teardown();
    } else {
        info!("dispatcher installed");
    }
}

/// The installed dispatcher, if one of type `Dispatcher<P>` is set up.
pub fn try_global_instance<P: Projector + 'static>() -> Option<Dispatcher<P>> {
    INSTANCE.with(|slot| {
        slot.borrow()
            .as_ref()
            .and_then(|installed| installed.as_any().downcast_ref::<Dispatcher<P>>())
            .cloned()
    })
}

/// The installed dispatcher.
///
/// # Panics
///
/// Panics if no `Dispatcher<P>` has been set up on this thread.
pub fn global_instance<P: Projector + 'static>() -> Dispatcher<P> {
    match try_global_instance::<P>() {
        Some(dispatcher) => dispatcher,
        None => panic!(
            "global dispatcher not set up; call setup_global_instance before registering observers"
        ),
    }
}

/// Tear down and remove the installed dispatcher. Returns whether one was
/// installed.
pub fn teardown_global_instance() -> bool {
    let previous = INSTANCE.with(|slot| slot.borrow_mut().take());

    match previous {
        Some(installed) => {
            installed.teardown();
            true
        }
        None => false,
    }
}

/// Track `key` on the installed dispatcher.
///
/// # Panics
///
/// Panics if no `Dispatcher<P>` has been set up on this thread.
pub fn add_observer<P: Projector + 'static>(
    key: P::Key,
    observer: Rc<dyn Observer>,
) -> ObserverToken {
    global_instance::<P>().register(key, observer)
}

/// Revoke `token` on the installed dispatcher. A missing dispatcher is not
/// an error; there is nothing left to revoke.
pub fn remove_observer<P: Projector + 'static>(token: ObserverToken) {
    if let Some(dispatcher) = try_global_instance::<P>() {
        dispatcher.unregister(token);
    }
}
