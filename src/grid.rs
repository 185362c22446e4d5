use crate::error::{FieldError, FieldResult};
use crate::table::FieldRow;
use ndarray::Array2;

/// One structured regular grid (a layer × nest combination) with its cell
/// geometry and dense values.
///
/// Row 0 is the northernmost row: `ycc` is descending and `dy[0]` is the
/// height of the top row. `(xl, yl)` is the lower-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct GridDescriptor {
    pub field: String,
    pub layer: usize,
    pub inest: usize,
    pub nrow: usize,
    pub ncol: usize,
    pub xl: f64,
    pub yl: f64,
    pub dx: Vec<f64>,
    pub dy: Vec<f64>,
    pub xcc: Vec<f64>,
    pub ycc: Vec<f64>,
    pub array: Array2<f64>,
}

impl GridDescriptor {
    /// Builds a grid from its origin and spacing, deriving cell centres.
    pub fn new(
        field: impl Into<String>,
        layer: usize,
        inest: usize,
        xl: f64,
        yl: f64,
        dx: Vec<f64>,
        dy: Vec<f64>,
        array: Array2<f64>,
    ) -> FieldResult<Self> {
        let (nrow, ncol) = array.dim();
        if dx.len() != ncol || dy.len() != nrow {
            return Err(FieldError::shape(
                layer,
                inest,
                format!(
                    "spacing ({} dx, {} dy) does not match array shape ({nrow}, {ncol})",
                    dx.len(),
                    dy.len()
                ),
            ));
        }

        let mut xcc = Vec::with_capacity(ncol);
        let mut left = xl;
        for w in &dx {
            xcc.push(left + w / 2.0);
            left += w;
        }

        let mut ycc = Vec::with_capacity(nrow);
        let mut top = yl + dy.iter().sum::<f64>();
        for h in &dy {
            ycc.push(top - h / 2.0);
            top -= h;
        }

        Ok(GridDescriptor {
            field: field.into(),
            layer,
            inest,
            nrow,
            ncol,
            xl,
            yl,
            dx,
            dy,
            xcc,
            ycc,
            array,
        })
    }

    /// Builds a grid from known cell centres, deriving spacing from their
    /// local gradient and the origin from the outermost centres.
    pub fn from_centers(
        field: impl Into<String>,
        layer: usize,
        inest: usize,
        xcc: Vec<f64>,
        ycc: Vec<f64>,
        array: Array2<f64>,
    ) -> FieldResult<Self> {
        let (nrow, ncol) = array.dim();
        if xcc.len() != ncol || ycc.len() != nrow || nrow == 0 || ncol == 0 {
            return Err(FieldError::shape(
                layer,
                inest,
                format!(
                    "{} x-centres and {} y-centres for array shape ({nrow}, {ncol})",
                    xcc.len(),
                    ycc.len()
                ),
            ));
        }

        let (dx, dy) = paired_spacing(&xcc, &ycc);
        let xl = xcc[0] - dx[0] / 2.0;
        let yl = ycc[nrow - 1] - dy[nrow - 1] / 2.0;

        Ok(GridDescriptor {
            field: field.into(),
            layer,
            inest,
            nrow,
            ncol,
            xl,
            yl,
            dx,
            dy,
            xcc,
            ycc,
            array,
        })
    }

    pub fn uniform(
        field: impl Into<String>,
        layer: usize,
        inest: usize,
        xl: f64,
        yl: f64,
        cell_size: f64,
        array: Array2<f64>,
    ) -> FieldResult<Self> {
        let (nrow, ncol) = array.dim();
        Self::new(
            field,
            layer,
            inest,
            xl,
            yl,
            vec![cell_size; ncol],
            vec![cell_size; nrow],
            array,
        )
    }

    pub fn width(&self) -> f64 {
        self.dx.iter().sum()
    }

    pub fn height(&self) -> f64 {
        self.dy.iter().sum()
    }

    /// Column boundaries, west to east (`ncol + 1` values).
    pub fn xvertices(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.ncol + 1);
        let mut x = self.xl;
        out.push(x);
        for w in &self.dx {
            x += w;
            out.push(x);
        }
        out
    }

    /// Row boundaries, north to south (`nrow + 1` values).
    pub fn yvertices(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.nrow + 1);
        let mut y = self.yl + self.height();
        out.push(y);
        for h in &self.dy {
            y -= h;
            out.push(y);
        }
        out
    }

    /// Footprint of one cell as `(xmin, ymin, xmax, ymax)`.
    pub fn cell_bounds(&self, row: usize, col: usize) -> (f64, f64, f64, f64) {
        let (x, y) = (self.xcc[col], self.ycc[row]);
        let (hx, hy) = (self.dx[col] / 2.0, self.dy[row] / 2.0);
        (x - hx, y - hy, x + hx, y + hy)
    }

    pub fn is_uniform(&self) -> bool {
        let same = |v: &[f64]| v.windows(2).all(|w| w[0] == w[1]);
        same(&self.dx) && same(&self.dy) && self.dx.first() == self.dy.first()
    }

    /// Flattens the grid into table rows, row-major.
    pub fn to_rows(&self) -> impl Iterator<Item = FieldRow> + '_ {
        self.array.indexed_iter().map(|((row, col), &value)| FieldRow {
            layer: self.layer,
            inest: self.inest,
            row,
            col,
            x: self.xcc[col],
            y: self.ycc[row],
            value,
        })
    }
}

/// Absolute local gradient of a sequence of cell centres: central differences
/// inside, one-sided differences at both ends.
pub fn axis_spacing(centers: &[f64]) -> Vec<f64> {
    let n = centers.len();
    match n {
        0 | 1 => Vec::new(),
        _ => (0..n)
            .map(|i| {
                let d = if i == 0 {
                    centers[1] - centers[0]
                } else if i == n - 1 {
                    centers[n - 1] - centers[n - 2]
                } else {
                    (centers[i + 1] - centers[i - 1]) / 2.0
                };
                d.abs()
            })
            .collect(),
    }
}

// A single-centre axis has no gradient: it borrows the nearest edge spacing of
// the other axis, or 1.0 when both axes are single cells.
pub(crate) fn paired_spacing(xcc: &[f64], ycc: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut dx = axis_spacing(xcc);
    let mut dy = axis_spacing(ycc);
    match (dx.is_empty(), dy.is_empty()) {
        (true, true) => {
            dx = vec![1.0; xcc.len()];
            dy = vec![1.0; ycc.len()];
        }
        (true, false) => dx = vec![dy[0]; xcc.len()],
        (false, true) => dy = vec![dx[0]; ycc.len()],
        (false, false) => {}
    }
    (dx, dy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn centres_follow_origin_and_spacing() {
        let g = GridDescriptor::new(
            "permh",
            0,
            0,
            100.0,
            200.0,
            vec![10.0, 20.0],
            vec![5.0, 15.0],
            array![[1.0, 2.0], [3.0, 4.0]],
        )
        .unwrap();
        assert_eq!(g.xcc, vec![105.0, 120.0]);
        // row 0 is the top row, 20 units tall grid
        assert_eq!(g.ycc, vec![217.5, 207.5]);
        assert_eq!(g.xvertices(), vec![100.0, 110.0, 130.0]);
        assert_eq!(g.yvertices(), vec![220.0, 215.0, 200.0]);
        assert_eq!(g.cell_bounds(1, 1), (110.0, 200.0, 130.0, 215.0));
    }

    #[test]
    fn spacing_mismatch_is_a_shape_error() {
        let err = GridDescriptor::new(
            "permh",
            2,
            1,
            0.0,
            0.0,
            vec![1.0],
            vec![1.0, 1.0],
            array![[1.0, 2.0], [3.0, 4.0]],
        )
        .unwrap_err();
        assert!(matches!(err, FieldError::Shape { layer: 2, inest: 1, .. }));
    }

    #[test]
    fn gradient_handles_non_uniform_centres() {
        assert_eq!(axis_spacing(&[0.5, 1.5, 3.5]), vec![1.0, 1.5, 2.0]);
        assert_eq!(axis_spacing(&[3.0, 1.0]), vec![2.0, 2.0]);
        assert!(axis_spacing(&[1.0]).is_empty());
    }

    #[test]
    fn from_centres_recovers_uniform_origin() {
        let g = GridDescriptor::from_centers(
            "charge",
            0,
            0,
            vec![0.5, 1.5, 2.5],
            vec![1.5, 0.5],
            Array2::zeros((2, 3)),
        )
        .unwrap();
        assert_eq!(g.xl, 0.0);
        assert_eq!(g.yl, 0.0);
        assert_eq!(g.dx, vec![1.0; 3]);
        assert!(g.is_uniform());
    }

    #[test]
    fn single_column_borrows_row_spacing() {
        let g = GridDescriptor::from_centers(
            "charge",
            0,
            0,
            vec![5.0],
            vec![3.0, 1.0],
            Array2::zeros((2, 1)),
        )
        .unwrap();
        assert_eq!(g.dx, vec![2.0]);
        assert_eq!(g.xl, 4.0);
    }

    #[test]
    fn rows_are_row_major() {
        let g = GridDescriptor::uniform("h", 3, 0, 0.0, 0.0, 1.0, array![[1.0, 2.0], [3.0, 4.0]])
            .unwrap();
        let rows: Vec<_> = g.to_rows().collect();
        assert_eq!(rows.len(), 4);
        assert_eq!((rows[1].row, rows[1].col, rows[1].value), (0, 1, 2.0));
        assert_eq!((rows[2].x, rows[2].y), (0.5, 0.5));
        assert!(rows.iter().all(|r| r.layer == 3));
    }
}
