use crate::error::FieldResult;
use crate::grid::GridDescriptor;
use std::path::Path;

/// Location of one grid block of a simulation output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBlock {
    pub field: String,
    pub istep: usize,
    pub layer: usize,
    pub inest: usize,
    /// Byte offset of the first record of the block.
    pub start: u64,
    /// Byte offset just past the block.
    pub end: u64,
}

/// Sequential grid stream reader. Implementations open the file on each call
/// and release it before returning.
pub trait StreamReader {
    /// Scans the stream once for its blocks, without reading grid values.
    fn index(&self, path: &Path) -> FieldResult<Vec<StreamBlock>>;

    /// Grids of the whole stream, or of the `[start, end)` byte range.
    fn read_grids(&self, path: &Path, range: Option<(u64, u64)>)
    -> FieldResult<Vec<GridDescriptor>>;
}

/// Serialises grids back into a stream that its reader can index.
pub trait StreamWriter {
    /// Writes `(istep, grids)` pairs in order, replacing any existing file.
    fn write_steps(&self, path: &Path, steps: &[(usize, Vec<GridDescriptor>)]) -> FieldResult<()>;
}
