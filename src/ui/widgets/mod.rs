pub mod dialog;
pub mod session_list;
pub mod slider;

pub use dialog::ConfirmDialog;
pub use session_list::{status_color, SessionListWidget};
pub use slider::Slider;
