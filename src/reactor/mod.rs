//! Request dispatch: ties registry lookup, flow resolution, policy chains
//! and the backend call together for one request.

pub mod dispatcher;

pub use dispatcher::Dispatcher;
