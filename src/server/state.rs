use crate::settings;

#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) settings: settings::Settings,
    /// Viewer page, rendered once at startup.
    pub(crate) viewer_html: String,
}
