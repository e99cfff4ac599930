use std::time::Duration;

use crate::error::MeshError;

/// A clickable download link on the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    /// Driver-specific reference to the element.
    pub element: String,
    /// Text of the listing row the link belongs to, usually the prefecture.
    pub label: Option<String>,
}

/// Browser-side operations the download run needs.
pub trait PageDriver {
    fn list_download_links(&self) -> Result<Vec<LinkHandle>, MeshError>;
    fn click(&self, link: &LinkHandle) -> Result<(), MeshError>;
    /// Returns whether a modal was found and closed.
    fn dismiss_modal_if_present(&self) -> Result<bool, MeshError>;
    /// Waits up to `timeout` for a native confirmation dialog and accepts it.
    fn accept_confirmation_if_present(&self, timeout: Duration) -> Result<bool, MeshError>;
}
