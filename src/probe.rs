//! Live participant surfaces driven through Chromium

mod browser;
mod cdp;

pub use browser::SurfaceBrowser;
pub use cdp::{CdpProbe, SurfaceSelectors};
