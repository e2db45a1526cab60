pub mod backend;
pub mod error;
pub mod flags;
pub mod webdriver;

pub use backend::{BrowserBackend, ContextOptions, LaunchOptions, Viewport};
pub use error::{BrowserError, Result};
pub use flags::SessionFlags;
pub use webdriver::{DriverConfig, WebDriverBackend};
