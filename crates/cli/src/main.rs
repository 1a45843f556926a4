// Compute pairwise Pearson or biweight midcorrelations between the rows of a
// TSV matrix, tolerating missing values.

use csv::{ReaderBuilder, WriterBuilder};
use flate2::{
    read::{GzDecoder, MultiGzDecoder},
    write::GzEncoder,
    Compression,
};
use log::{debug, LevelFilter};
use ndarray::{Array1, Array2};
use std::{
    collections::{HashMap, HashSet},
    env,
    error::Error,
    fs::File,
    io::{Cursor, Read},
    time::Instant,
};
use strum_macros::{Display, EnumString};
use tar::{Archive, Builder, Header};

use fastcor::{bicor, pearson, BicorOptions, CorOptions, CorResult, ZeroMadFallback};

const USAGE: &str = "Usage: fastcor <input_file> <pearson|bicor> [num_threads] [--time] [--quick Q] [--cosine] [--max-p-outliers P] [--fallback none|individual|all|force-pearson] [--weights PATH] [--subset-a-rows ID1,ID2,... | --subset-a-file PATH] [--subset-b-rows ... | --subset-b-file PATH] [--subset-vs-all] [-v|-vv]\nnum_threads: number of threads to use (default: all available)\n--quick: fraction of missing rows tolerated before exact recomputation (default 0)\n--time: enable detailed timing output";

#[derive(EnumString, Display)]
#[strum(ascii_case_insensitive)]
enum CorrelationType {
    #[strum(serialize = "Pearson")]
    Pearson,
    #[strum(serialize = "Bicor", serialize = "Biweight", to_string = "Bicor")]
    Bicor,
}

#[derive(Default)]
struct SubsetConfig {
    file: Option<String>,
    rows: Option<Vec<String>>,
}

impl SubsetConfig {
    fn has_any(&self) -> bool {
        self.file.is_some() || self.rows.is_some()
    }
}

struct CliArgs {
    input: String,
    correlation_type: CorrelationType,
    num_threads: usize,
    time_tracking: bool,
    quick: f64,
    cosine: bool,
    max_p_outliers: f64,
    fallback: ZeroMadFallback,
    weights: Option<String>,
    subset_vs_all: bool,
    subset_a: SubsetConfig,
    subset_b: SubsetConfig,
    verbose: u8,
}

type RowData = HashMap<String, Array1<f64>>;

/// Builds a samples × variables matrix: column `k` holds the values of
/// `row_ids[k]`.
fn build_data_matrix(row_ids: &[String], row_data: &RowData) -> Result<Array2<f64>, Box<dyn Error>> {
    let n_samples = row_data.values().next().map(|v| v.len()).unwrap_or(0);

    let mut matrix = Array2::<f64>::from_elem((n_samples, row_ids.len()), f64::NAN);
    for (k, row_id) in row_ids.iter().enumerate() {
        let values = row_data
            .get(row_id)
            .ok_or_else(|| format!("Row ID '{}' not found", row_id))?;
        if values.len() != n_samples {
            return Err(format!(
                "Row '{}' has {} values, expected {}",
                row_id,
                values.len(),
                n_samples
            )
            .into());
        }
        matrix.column_mut(k).assign(values);
    }
    Ok(matrix)
}

fn read_matrix_data<R: Read>(reader: R) -> Result<RowData, Box<dyn Error>> {
    let mut row_data = HashMap::new();
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);

    // Row ID plus at least two samples
    let header_len = rdr.headers()?.len();
    if header_len < 3 {
        return Err("Input file must contain at least two sample columns".into());
    }

    for (idx, record) in rdr.records().enumerate() {
        let record = record?;

        let raw_row_id = record.get(0).unwrap_or("").trim();
        if raw_row_id.is_empty() {
            return Err(format!("Empty row ID encountered on line {}", idx + 2).into());
        }
        if row_data.contains_key(raw_row_id) {
            return Err(format!(
                "Duplicate row ID '{}' encountered on line {}",
                raw_row_id,
                idx + 2
            )
            .into());
        }

        // Anything that does not parse ("NA", "", ...) is missing.
        let values: Array1<f64> = record
            .iter()
            .skip(1)
            .map(|s| s.trim().parse().unwrap_or(f64::NAN))
            .collect::<Vec<_>>()
            .into();

        row_data.insert(raw_row_id.to_string(), values);
    }
    Ok(row_data)
}

fn load_table(path: &str) -> Result<RowData, Box<dyn Error>> {
    if path.ends_with(".tar.gz") {
        let file = File::open(path)?;
        let mut archive = Archive::new(GzDecoder::new(file));
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_file() {
                return read_matrix_data(&mut entry);
            }
        }
        Err("No readable file found in tar archive".into())
    } else if path.ends_with(".gz") {
        read_matrix_data(MultiGzDecoder::new(File::open(path)?))
    } else {
        read_matrix_data(File::open(path)?)
    }
}

fn split_ids(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_args() -> Result<CliArgs, Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        return Err(USAGE.into());
    }

    let mut cli = CliArgs {
        input: args[1].clone(),
        correlation_type: args[2].parse()?,
        num_threads: 0,
        time_tracking: false,
        quick: 0.0,
        cosine: false,
        max_p_outliers: 1.0,
        fallback: ZeroMadFallback::Individual,
        weights: None,
        subset_vs_all: false,
        subset_a: SubsetConfig::default(),
        subset_b: SubsetConfig::default(),
        verbose: 0,
    };

    let mut i = 3;
    while i < args.len() {
        let arg = args[i].as_str();

        // Flags without a value
        match arg {
            "--time" => {
                cli.time_tracking = true;
                i += 1;
                continue;
            }
            "--cosine" => {
                cli.cosine = true;
                i += 1;
                continue;
            }
            "--subset-vs-all" => {
                cli.subset_vs_all = true;
                i += 1;
                continue;
            }
            "-v" => {
                cli.verbose = cli.verbose.max(1);
                i += 1;
                continue;
            }
            "-vv" => {
                cli.verbose = 2;
                i += 1;
                continue;
            }
            _ => {}
        }

        // `--name value` or `--name=value`
        let (name, value, consumed) = match arg.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, value.to_string(), 1),
            _ if arg.starts_with("--") => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| format!("Missing value for {}", arg))?;
                (arg, value.clone(), 2)
            }
            _ => {
                let threads = arg
                    .parse::<usize>()
                    .map_err(|_| format!("Unknown argument: {}", arg))?;
                cli.num_threads = threads;
                i += 1;
                continue;
            }
        };

        match name {
            "--quick" => {
                cli.quick = value.parse().map_err(|_| "Invalid --quick value")?;
            }
            "--max-p-outliers" => {
                cli.max_p_outliers = value.parse().map_err(|_| "Invalid --max-p-outliers value")?;
            }
            "--fallback" => {
                cli.fallback = value.parse().map_err(|_| "Invalid --fallback value")?;
            }
            "--weights" => cli.weights = Some(value),
            "--subset-a-file" | "--subset-file" => cli.subset_a.file = Some(value),
            "--subset-a-rows" | "--subset-rows" => cli.subset_a.rows = Some(split_ids(&value)),
            "--subset-b-file" => cli.subset_b.file = Some(value),
            "--subset-b-rows" => cli.subset_b.rows = Some(split_ids(&value)),
            _ => return Err(format!("Unknown argument: {}", name).into()),
        }
        i += consumed;
    }

    Ok(cli)
}

fn load_subset_rows_from_file(path: &str) -> Result<Vec<String>, Box<dyn Error>> {
    let content = std::fs::read_to_string(path)?;
    let rows: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .map(ToString::to_string)
        .collect();
    if rows.is_empty() {
        return Err(format!("No row IDs found in subset file: {}", path).into());
    }
    Ok(rows)
}

fn select_named_rows(
    all_rows: &[String],
    requested: &[String],
) -> Result<Vec<String>, Box<dyn Error>> {
    let available: HashSet<&str> = all_rows.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    let mut missing = Vec::new();
    for name in requested.iter().map(|r| r.trim()).filter(|r| !r.is_empty()) {
        if !seen.insert(name) {
            continue;
        }
        if available.contains(name) {
            selected.push(name.to_string());
        } else {
            missing.push(name);
        }
    }
    if !missing.is_empty() {
        return Err(format!(
            "{} requested row IDs not found (first up to 10): {}",
            missing.len(),
            missing.iter().take(10).copied().collect::<Vec<_>>().join(", ")
        )
        .into());
    }
    if selected.is_empty() {
        return Err("Subset selection produced zero rows".into());
    }
    Ok(selected)
}

fn apply_subset(
    row_ids: &[String],
    subset: &SubsetConfig,
) -> Result<(Vec<String>, Option<String>), Box<dyn Error>> {
    match (&subset.file, &subset.rows) {
        (None, None) => Ok((row_ids.to_vec(), None)),
        (Some(_), Some(_)) => Err("Use only one subset mode per side: a file or a row list".into()),
        (Some(path), None) => {
            let requested = load_subset_rows_from_file(path)?;
            let selected = select_named_rows(row_ids, &requested)?;
            let tag = format!("subsetfile{}", selected.len());
            Ok((selected, Some(tag)))
        }
        (None, Some(rows)) => {
            let selected = select_named_rows(row_ids, rows)?;
            let tag = format!("subsetlist{}", selected.len());
            Ok((selected, Some(tag)))
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn timer(enabled: bool) -> Option<Instant> {
    if enabled {
        Some(Instant::now())
    } else {
        None
    }
}

fn format_cell(r: f64) -> String {
    if r.is_nan() {
        "NA".to_string()
    } else {
        r.to_string()
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = parse_args()?;
    init_logging(cli.verbose);

    if cli.num_threads > 0 {
        println!("Using up to {} threads.", cli.num_threads);
    } else {
        println!("Using all available CPU cores.");
    }

    // Data loading
    let load_start = timer(cli.time_tracking);
    let row_data = load_table(&cli.input)?;
    let weight_data = match &cli.weights {
        Some(path) => {
            if !matches!(cli.correlation_type, CorrelationType::Pearson) {
                return Err("--weights is only supported for Pearson correlation".into());
            }
            Some(load_table(path)?)
        }
        None => None,
    };
    let load_duration = load_start.map(|start| start.elapsed());

    if let Some(duration) = load_duration {
        println!(
            "Expression data loaded in {:.3} seconds.",
            duration.as_secs_f64()
        );
    }

    let mut all_row_ids: Vec<String> = row_data.keys().cloned().collect();
    all_row_ids.sort();

    if cli.subset_vs_all && cli.subset_b.has_any() {
        return Err("--subset-vs-all cannot be combined with --subset-b-* selectors".into());
    }
    if cli.subset_vs_all && !cli.subset_a.has_any() {
        return Err("--subset-vs-all requires a subset A selection".into());
    }

    let (row_ids_a, subset_tag_a) = apply_subset(&all_row_ids, &cli.subset_a)?;
    if let Some(tag) = &subset_tag_a {
        println!(
            "Applying subset A mode: {} ({} rows selected).",
            tag,
            row_ids_a.len()
        );
    }

    let use_subset_b = cli.subset_b.has_any() || cli.subset_vs_all;
    let (row_ids_b, subset_tag_b) = if cli.subset_vs_all {
        println!(
            "Applying subset B mode: all rows ({} rows selected).",
            all_row_ids.len()
        );
        (all_row_ids.clone(), Some("all".to_string()))
    } else if cli.subset_b.has_any() {
        let (rows, tag) = apply_subset(&all_row_ids, &cli.subset_b)?;
        if let Some(tagv) = &tag {
            println!(
                "Applying subset B mode: {} ({} rows selected).",
                tagv,
                rows.len()
            );
        }
        (rows, tag)
    } else {
        (Vec::new(), None)
    };

    let n_samples = row_data.values().next().map(|v| v.len()).unwrap_or(0);
    if use_subset_b {
        println!(
            "Matrix dimensions: {} rows x {} columns (A x B), source samples: {}",
            row_ids_a.len(),
            row_ids_b.len(),
            n_samples
        );
    } else {
        println!(
            "Matrix dimensions: {} rows x {} columns",
            row_ids_a.len(),
            n_samples
        );
    }

    let data_a = build_data_matrix(&row_ids_a, &row_data)?;
    let data_b = if use_subset_b {
        Some(build_data_matrix(&row_ids_b, &row_data)?)
    } else {
        None
    };
    let weights_a = match &weight_data {
        Some(w) => Some(build_data_matrix(&row_ids_a, w)?),
        None => None,
    };
    let weights_b = match (&weight_data, use_subset_b) {
        (Some(w), true) => Some(build_data_matrix(&row_ids_b, w)?),
        _ => None,
    };
    debug!(
        "samples x variables: A {:?}, B {:?}",
        data_a.dim(),
        data_b.as_ref().map(|b| b.dim())
    );

    let cor_options = CorOptions {
        quick: cli.quick,
        cosine_x: cli.cosine,
        cosine_y: cli.cosine,
        n_threads: cli.num_threads,
        verbose: cli.verbose,
        ..CorOptions::default()
    };

    // Correlation calculation
    let calc_start = timer(cli.time_tracking);
    let result: CorResult = match cli.correlation_type {
        CorrelationType::Pearson => {
            println!("Computing Pearson correlations...");
            match (&data_b, &weights_a) {
                (Some(b), _) => pearson::weighted_correlation_cross_matrix(
                    &data_a,
                    b,
                    weights_a.as_ref().map(|w| w.view()),
                    weights_b.as_ref().map(|w| w.view()),
                    &cor_options,
                )?,
                (None, Some(w)) => pearson::weighted_correlation_matrix(&data_a, w, &cor_options)?,
                (None, None) => pearson::correlation_matrix(&data_a, &cor_options)?,
            }
        }
        CorrelationType::Bicor => {
            println!("Computing biweight midcorrelations (bicor)...");
            let options = BicorOptions {
                cor: cor_options,
                max_p_outliers: cli.max_p_outliers,
                fallback: cli.fallback,
                ..BicorOptions::default()
            };
            match &data_b {
                Some(b) => bicor::correlation_cross_matrix(&data_a, b, &options)?,
                None => bicor::correlation_matrix(&data_a, &options)?,
            }
        }
    };

    let calc_duration = calc_start.map(|start| start.elapsed());
    if let Some(duration) = calc_duration {
        println!(
            "{} correlations calculated in {:.3} seconds.",
            cli.correlation_type,
            duration.as_secs_f64()
        );
    }

    println!(
        "Threads used: {}; exactly recomputed cells: {}; NA from recomputation: {}",
        result.n_threads, result.n_slow, result.n_na
    );
    if result.warning_code() != 0 {
        println!(
            "Warning: zero median absolute deviation in some rows (fallback: {}).",
            cli.fallback
        );
    }
    if result.error_code() != 0 {
        println!(
            "Error code {}: worker threads could not be started, computed on one thread.",
            result.error_code()
        );
    }

    let output_row_ids = &row_ids_a;
    let output_col_ids = if use_subset_b { &row_ids_b } else { &row_ids_a };

    // Output writing
    let output_start = timer(cli.time_tracking);
    let mut csv_buf = Vec::<u8>::new();
    {
        let mut wtr = WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(&mut csv_buf);

        wtr.write_record(std::iter::once("").chain(output_col_ids.iter().map(String::as_str)))?;

        for (i, row_id) in output_row_ids.iter().enumerate() {
            let row_vals: Vec<String> = result.matrix.row(i).iter().map(|&r| format_cell(r)).collect();
            wtr.write_record(
                std::iter::once(row_id.as_str()).chain(row_vals.iter().map(String::as_str)),
            )?;
        }
        wtr.flush()?;
    }

    let correlation_suffix = cli.correlation_type.to_string().to_lowercase();

    let input_basename = std::path::Path::new(&cli.input)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data");
    let input_basename = input_basename.strip_suffix(".tar").unwrap_or(input_basename);

    let output_base = if use_subset_b {
        let tag_a = subset_tag_a.unwrap_or_else(|| "all".to_string());
        let tag_b = subset_tag_b.unwrap_or_else(|| "all".to_string());
        format!("{}_A{}_B{}", input_basename, tag_a, tag_b)
    } else if let Some(tag) = &subset_tag_a {
        format!("{}_{}", input_basename, tag)
    } else {
        input_basename.to_string()
    };

    let tar_gz_path = format!("{}_{}_correlations.tar.gz", output_base, correlation_suffix);
    let enc = GzEncoder::new(File::create(&tar_gz_path)?, Compression::default());
    let mut tar_builder = Builder::new(enc);

    let mut header = Header::new_gnu();
    header.set_size(csv_buf.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let csv_name = format!("{}_{}_correlations.tsv", output_base, correlation_suffix);
    tar_builder.append_data(&mut header, csv_name, &mut Cursor::new(csv_buf))?;
    tar_builder.finish()?;
    let output_duration = output_start.map(|start| start.elapsed());

    if let Some(duration) = output_duration {
        println!("Output written in {:.3} seconds.", duration.as_secs_f64());
    }

    if let (Some(load_dur), Some(calc_dur), Some(output_dur)) =
        (load_duration, calc_duration, output_duration)
    {
        let total_duration = load_dur + calc_dur + output_dur;
        println!("Data loading:           {:8.3} seconds", load_dur.as_secs_f64());
        println!("Correlation calculation: {:8.3} seconds", calc_dur.as_secs_f64());
        println!("Output writing:         {:8.3} seconds", output_dur.as_secs_f64());
        println!("Total time:             {:8.3} seconds", total_duration.as_secs_f64());
    }

    Ok(())
}
