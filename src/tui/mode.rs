// state local to the tui; playing and track_count are synced from DisplayState
// each frame so a key can resolve differently depending on the transport
#[derive(Clone, Debug, Default)]
pub struct TuiState {
    pub playing: bool,
    pub track_count: usize,
}
