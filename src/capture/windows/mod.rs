//! Windows capture implementations
//!
//! GDI screen grabbing and cursor rendering.

pub mod screen;

pub use screen::{get_displays, virtual_screen, GdiCursorProvider, GdiGrabber};
