use crate::error::{FieldError, FieldResult};
use crate::grid::GridDescriptor;
use crate::io::stream::{StreamBlock, StreamReader, StreamWriter};
use csv::{Reader, ReaderBuilder, StringRecord, WriterBuilder};
use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const GRID_TAG: &str = "GRID";
const DX_TAG: &str = "DX";
const DY_TAG: &str = "DY";
const ROW_TAG: &str = "ROW";

/// Block stream stored as flexible CSV, one block per grid:
///
/// ```text
/// GRID,<field>,<istep>,<layer>,<inest>,<nrow>,<ncol>,<xl>,<yl>
/// DX,<dx_0>,...
/// DY,<dy_0>,...
/// ROW,<v_0>,...        (nrow records, north first)
/// ```
///
/// Lines starting with `#` are comments.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvStream;

// Header record of a grid block
#[derive(Debug)]
struct GridHeader {
    field: String,
    istep: usize,
    layer: usize,
    inest: usize,
    nrow: usize,
    ncol: usize,
    xl: f64,
    yl: f64,
}

impl GridHeader {
    fn from_record(record: &StringRecord, byte: u64) -> FieldResult<Self> {
        if record.len() < 9 {
            return Err(FieldError::Parse {
                byte,
                reason: format!("grid header has {} fields, expected 9", record.len()),
            });
        }
        Ok(GridHeader {
            field: record[1].to_string(),
            istep: parse_field(record, 2, byte)?,
            layer: parse_field(record, 3, byte)?,
            inest: parse_field(record, 4, byte)?,
            nrow: parse_field(record, 5, byte)?,
            ncol: parse_field(record, 6, byte)?,
            xl: parse_field(record, 7, byte)?,
            yl: parse_field(record, 8, byte)?,
        })
    }
}

// Grid being assembled while its records are read
struct PendingGrid {
    header: GridHeader,
    byte: u64,
    dx: Option<Vec<f64>>,
    dy: Option<Vec<f64>>,
    values: Vec<f64>,
    rows: usize,
}

impl PendingGrid {
    fn finish(self) -> FieldResult<GridDescriptor> {
        let h = self.header;
        let byte = self.byte;
        let parse_err = |reason: String| FieldError::Parse { byte, reason };
        let dx = self.dx.ok_or_else(|| parse_err("grid block without DX record".into()))?;
        let dy = self.dy.ok_or_else(|| parse_err("grid block without DY record".into()))?;
        if self.rows != h.nrow {
            return Err(parse_err(format!(
                "grid block has {} ROW records, header says {}",
                self.rows, h.nrow
            )));
        }
        let array = Array2::from_shape_vec((h.nrow, h.ncol), self.values)
            .map_err(|e| parse_err(e.to_string()))?;
        GridDescriptor::new(h.field, h.layer, h.inest, h.xl, h.yl, dx, dy, array)
    }
}

fn reader_builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All);
    builder
}

fn parse_field<T: std::str::FromStr>(record: &StringRecord, idx: usize, byte: u64) -> FieldResult<T> {
    record[idx].parse::<T>().map_err(|_| FieldError::Parse {
        byte,
        reason: format!("cannot parse `{}` in column {idx}", &record[idx]),
    })
}

fn parse_values(record: &StringRecord, byte: u64) -> FieldResult<Vec<f64>> {
    (1..record.len())
        .map(|i| parse_field::<f64>(record, i, byte))
        .collect()
}

fn parse_grids<R: Read>(mut rdr: Reader<R>, offset: u64) -> FieldResult<Vec<GridDescriptor>> {
    let mut grids = Vec::new();
    let mut pending: Option<PendingGrid> = None;
    let mut record = StringRecord::new();

    loop {
        let byte = offset + rdr.position().byte();
        if !rdr.read_record(&mut record)? {
            break;
        }
        let tag = record.get(0).unwrap_or_default();
        if tag == GRID_TAG {
            if let Some(done) = pending.take() {
                grids.push(done.finish()?);
            }
            pending = Some(PendingGrid {
                header: GridHeader::from_record(&record, byte)?,
                byte,
                dx: None,
                dy: None,
                values: Vec::new(),
                rows: 0,
            });
            continue;
        }

        let grid = pending.as_mut().ok_or_else(|| FieldError::Parse {
            byte,
            reason: format!("`{tag}` record outside a grid block"),
        })?;
        let values = parse_values(&record, byte)?;
        match tag {
            DX_TAG => grid.dx = Some(values),
            DY_TAG => grid.dy = Some(values),
            ROW_TAG => {
                if values.len() != grid.header.ncol {
                    return Err(FieldError::Parse {
                        byte,
                        reason: format!(
                            "row has {} values, grid has {} columns",
                            values.len(),
                            grid.header.ncol
                        ),
                    });
                }
                grid.values.extend(values);
                grid.rows += 1;
            }
            other => {
                return Err(FieldError::Parse {
                    byte,
                    reason: format!("unknown record tag `{other}`"),
                });
            }
        }
    }

    if let Some(done) = pending {
        grids.push(done.finish()?);
    }
    Ok(grids)
}

impl StreamReader for CsvStream {
    fn index(&self, path: &Path) -> FieldResult<Vec<StreamBlock>> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut rdr = reader_builder().from_reader(BufReader::new(file));

        let mut blocks: Vec<StreamBlock> = Vec::new();
        let mut record = StringRecord::new();
        loop {
            let start = rdr.position().byte();
            if !rdr.read_record(&mut record)? {
                break;
            }
            if record.get(0) != Some(GRID_TAG) {
                continue;
            }
            if let Some(last) = blocks.last_mut() {
                last.end = start;
            }
            let header = GridHeader::from_record(&record, start)?;
            blocks.push(StreamBlock {
                field: header.field,
                istep: header.istep,
                layer: header.layer,
                inest: header.inest,
                start,
                end: file_len,
            });
        }
        Ok(blocks)
    }

    fn read_grids(
        &self,
        path: &Path,
        range: Option<(u64, u64)>,
    ) -> FieldResult<Vec<GridDescriptor>> {
        let mut file = File::open(path)?;
        match range {
            Some((start, end)) => {
                file.seek(SeekFrom::Start(start))?;
                let bounded = BufReader::new(file).take(end.saturating_sub(start));
                parse_grids(reader_builder().from_reader(bounded), start)
            }
            None => parse_grids(reader_builder().from_reader(BufReader::new(file)), 0),
        }
    }
}

impl StreamWriter for CsvStream {
    fn write_steps(&self, path: &Path, steps: &[(usize, Vec<GridDescriptor>)]) -> FieldResult<()> {
        let mut wtr = WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;

        for (istep, grids) in steps {
            for g in grids {
                wtr.write_record([
                    GRID_TAG.to_string(),
                    g.field.clone(),
                    istep.to_string(),
                    g.layer.to_string(),
                    g.inest.to_string(),
                    g.nrow.to_string(),
                    g.ncol.to_string(),
                    g.xl.to_string(),
                    g.yl.to_string(),
                ])?;
                write_tagged(&mut wtr, DX_TAG, &g.dx)?;
                write_tagged(&mut wtr, DY_TAG, &g.dy)?;
                for row in g.array.rows() {
                    let row: Vec<f64> = row.to_vec();
                    write_tagged(&mut wtr, ROW_TAG, &row)?;
                }
            }
        }
        wtr.flush()?;
        Ok(())
    }
}

fn write_tagged<W: std::io::Write>(
    wtr: &mut csv::Writer<W>,
    tag: &str,
    values: &[f64],
) -> FieldResult<()> {
    let mut record = Vec::with_capacity(values.len() + 1);
    record.push(tag.to_string());
    record.extend(values.iter().map(|v| v.to_string()));
    wtr.write_record(&record)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("field_rs_csv_stream");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn blocks_are_indexed_by_byte_range() {
        let path = temp_path("index.csv");
        let g0 = GridDescriptor::uniform("CHARGE", 0, 0, 0.0, 0.0, 1.0, array![[1.0, 2.0], [3.0, 4.0]])
            .unwrap();
        let g1 = GridDescriptor::uniform("CHARGE", 0, 0, 0.0, 0.0, 1.0, array![[5.0, 6.0], [7.0, 8.0]])
            .unwrap();
        CsvStream
            .write_steps(&path, &[(1, vec![g0.clone()]), (2, vec![g1.clone()])])
            .unwrap();

        let blocks = CsvStream.index(&path).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start, 0);
        assert_eq!(blocks[0].end, blocks[1].start);
        assert_eq!((blocks[1].field.as_str(), blocks[1].istep), ("CHARGE", 2));

        let second = CsvStream
            .read_grids(&path, Some((blocks[1].start, blocks[1].end)))
            .unwrap();
        assert_eq!(second, vec![g1.clone()]);
        assert_eq!(CsvStream.read_grids(&path, None).unwrap(), vec![g0, g1]);
    }

    #[test]
    fn malformed_blocks_report_their_offset() {
        let path = temp_path("bad.csv");
        std::fs::write(
            &path,
            "GRID,H,0,0,0,1,1,0,0\nDX,1\nDY,1\nROW,1\nGRID,H,0,1,0,2,1,0,0\nDX,1\nDY,1,1\nROW,1\n",
        )
        .unwrap();
        let err = CsvStream.read_grids(&path, None).unwrap_err();
        assert!(matches!(err, FieldError::Parse { byte: 37, .. }));

        std::fs::write(&path, "ROW,1\n").unwrap();
        assert!(matches!(
            CsvStream.read_grids(&path, None),
            Err(FieldError::Parse { .. })
        ));
    }
}
