use field_rs::convert::grids_to_table;
use field_rs::io::stream::{StreamReader, StreamWriter};
use field_rs::{
    CsvStream, DomainRef, Field, FieldConfig, FieldError, FieldSeries, GridDescriptor, IndexKind,
    Polygon, QueryPoints, SeriesKey, Stat,
};
use indicatif::ProgressBar;
use ndarray::array;
use std::path::PathBuf;
use std::sync::Arc;

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("field_rs_it");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn cell(field: &str, layer: usize, values: ndarray::Array2<f64>) -> GridDescriptor {
    GridDescriptor::uniform(field, layer, 0, 0.0, 0.0, 1.0, values).unwrap()
}

fn all_active_domain(config: &FieldConfig) -> Arc<DomainRef> {
    let imask = grids_to_table(&[cell("imask", 0, array![[1.0, 1.0], [1.0, 1.0]])]).unwrap();
    Arc::new(DomainRef::new(imask, config))
}

#[test]
fn charge_series_from_csv_stream() {
    let path = temp_path("chasim.csv");
    CsvStream
        .write_steps(
            &path,
            &[
                (1, vec![cell("CHARGE", 0, array![[1.0, 2.0], [3.0, 4.0]])]),
                (2, vec![cell("CHARGE", 0, array![[5.0, 6.0], [7.0, 8.0]])]),
            ],
        )
        .unwrap();

    let config = Arc::new(FieldConfig::default());
    let mut series =
        FieldSeries::open(CsvStream, path, all_active_domain(&config), Arc::clone(&config)).unwrap();
    assert_eq!(series.fields(), &["CHARGE".to_string()]);

    series.load_field("CHARGE", None, &ProgressBar::hidden()).unwrap();
    let points = QueryPoints::single(0.5, 1.5, 0);
    let ts = series
        .get_tseries(
            "CHARGE",
            &points,
            Some(&["p1".to_string()]),
            IndexKind::Istep,
            &config.series_masked_values,
            1,
        )
        .unwrap();

    assert_eq!(ts.index, vec![SeriesKey::Istep(1), SeriesKey::Istep(2)]);
    assert_eq!(ts.column("p1").unwrap(), vec![1.0, 5.0]);

    let out = temp_path("charge_tseries.csv");
    ts.write_csv(&out).unwrap();
    let content = std::fs::read_to_string(&out).unwrap();
    assert_eq!(content.lines().next(), Some("istep,p1"));
}

#[test]
fn multi_layer_steps_are_read_from_their_own_blocks() {
    let path = temp_path("two_layers.csv");
    let imask = vec![
        cell("imask", 0, array![[1.0, 1.0], [1.0, 1.0]]),
        cell("imask", 1, array![[1.0, 0.0], [1.0, 1.0]]),
    ];
    CsvStream
        .write_steps(
            &path,
            &[
                (
                    3,
                    vec![
                        cell("HEAD", 1, array![[10.0, 11.0], [12.0, 13.0]]),
                        cell("HEAD", 0, array![[0.5, 0.6], [0.7, 0.8]]),
                    ],
                ),
                (
                    4,
                    vec![
                        cell("HEAD", 0, array![[1.5, 1.6], [1.7, 1.8]]),
                        cell("HEAD", 1, array![[20.0, 21.0], [22.0, 23.0]]),
                    ],
                ),
            ],
        )
        .unwrap();

    let config = Arc::new(FieldConfig::default());
    let domain = Arc::new(DomainRef::new(grids_to_table(&imask).unwrap(), &config));
    let mut series = FieldSeries::open(CsvStream, path, domain, Arc::clone(&config)).unwrap();
    assert_eq!(series.blocks().len(), 4);

    let loaded = series
        .load_field("HEAD", Some(&[4, 3, 42]), &ProgressBar::hidden())
        .unwrap();
    assert_eq!(loaded, vec![3, 4]);

    let table = series.table("HEAD", 3).unwrap();
    assert_eq!(
        table.values(),
        &[0.5, 0.6, 0.7, 0.8, 10.0, 11.0, 12.0, 13.0]
    );

    // layer 1 at (1.5, 1.5) is inactive: it still resolves, its value is read as-is
    let points = QueryPoints::new(&[0.5, 1.5], &[0.5, 1.5], &[1]).unwrap();
    let ts = series
        .get_tseries("HEAD", &points, None, IndexKind::Istep, &[], 0)
        .unwrap();
    assert_eq!(ts.columns, vec!["1i_0j_1k".to_string(), "0i_1j_1k".to_string()]);
    assert_eq!(ts.values, vec![vec![12.0, 11.0], vec![22.0, 21.0]]);
}

#[test]
fn unknown_field_is_reported() {
    let path = temp_path("single.csv");
    CsvStream
        .write_steps(&path, &[(0, vec![cell("CHARGE", 0, array![[1.0, 1.0], [1.0, 1.0]])])])
        .unwrap();
    let config = Arc::new(FieldConfig::default());
    let mut series =
        FieldSeries::open(CsvStream, path, all_active_domain(&config), config).unwrap();
    assert!(matches!(
        series.load_field("SATURATION", None, &ProgressBar::hidden()),
        Err(FieldError::UnknownField { .. })
    ));
}

#[test]
fn field_written_to_stream_reads_back() {
    let config = Arc::new(FieldConfig::default());
    let domain = all_active_domain(&config);
    let field = Field::builder("permh")
        .domain(Arc::clone(&domain))
        .config(Arc::clone(&config))
        .build(vec![cell("permh", 0, array![[1e-4, 2e-4], [3e-4, 4e-4]])])
        .unwrap();

    let path = temp_path("permh.csv");
    field.write_data(&CsvStream, &path).unwrap();
    let grids = CsvStream.read_grids(&path, None).unwrap();
    let back = grids_to_table(&grids).unwrap();
    assert!(back.approx_eq(field.table(), 1e-15));
}

#[test]
fn zonal_stats_over_a_square() {
    let config = Arc::new(FieldConfig::default());
    let field = Field::builder("permh")
        .domain(all_active_domain(&config))
        .config(config)
        .build(vec![cell("permh", 0, array![[1.0, 2.0], [3.0, 4.0]])])
        .unwrap();

    let zones = vec![
        Polygon::new(vec![(-0.5, -0.5), (2.5, -0.5), (2.5, 2.5), (-0.5, 2.5)]),
        Polygon::new(vec![(1.0, 1.0)]),
    ];
    let stats = field
        .zonal_stats(&["mean", "count", "max"], &zones, None, None, "none")
        .unwrap();
    assert_eq!(stats.get("permh_z0", 0, Stat::Count), Some(4.0));
    assert_eq!(stats.get("permh_z0", 0, Stat::Mean), Some(2.5));
    assert_eq!(stats.get("permh_z1", 0, Stat::Count), Some(0.0));
    assert!(stats.get("permh_z1", 0, Stat::Max).unwrap().is_nan());

    assert!(matches!(
        field.zonal_stats(&["mode"], &zones, None, None, "none"),
        Err(FieldError::Config { .. })
    ));
}
