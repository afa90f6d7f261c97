pub mod page_guard;
pub mod shutdown;
