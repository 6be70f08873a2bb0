use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::io::{self, BufWriter, Write};

use polyedge::{
    calculate_allele_metrics, chop_bam, AlleleMetrics, ChopConfig, CutRegion, MetricsConfig,
    PolyRegion, Thresholds, DEFAULT_ANCHOR_LENGTH, TABLE_HEADERS,
};

/// Determine whether a known variant is present at the base preceding a poly
/// stretch, or chop reads spanning the stretch for display
#[derive(Parser, Debug)]
#[command(name = "polyedge", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-allele metrics for reads anchored across the poly stretch
    Metrics(MetricsArgs),
    /// Truncate reads crossing the poly stretch at its last aligned base
    Chop(ChopArgs),
}

#[derive(Args, Debug)]
struct MetricsArgs {
    /// Bam file to analyse
    #[arg(short = 'B', long)]
    bam: String,
    /// Bam index file (defaults to the index next to the BAM)
    #[arg(short = 'I', long)]
    bai: Option<String>,
    /// Gene of interest
    #[arg(short = 'G', long)]
    gene: String,
    /// Chromosome of interest
    #[arg(short = 'C', long)]
    chrom: String,
    /// Start position of poly stretch
    #[arg(short = 'S', long)]
    poly_start: i64,
    /// End position of poly stretch
    #[arg(short = 'E', long)]
    poly_end: i64,
    /// Length of anchor sequence
    #[arg(
        short = 'A',
        long,
        default_value_t = DEFAULT_ANCHOR_LENGTH,
        allow_negative_numbers = true
    )]
    anchor_length: i64,
    #[arg(short = 't', long, default_value_t = 1)]
    threads: usize,
}

#[derive(Args, Debug)]
struct ChopArgs {
    /// Input BAM ('-' for stdin)
    #[arg(short, long, default_value = "-")]
    input: String,
    /// Output BAM ('-' for stdout)
    #[arg(short, long, default_value = "-")]
    output: String,
    #[arg(short = 'C', long)]
    chrom: String,
    #[arg(short = 'S', long)]
    poly_start: i64,
    #[arg(short = 'E', long)]
    poly_end: i64,
    #[arg(short = 't', long, default_value_t = 1)]
    threads: usize,
}

fn qc_mark(pass: bool) -> &'static str {
    if pass {
        ""
    } else {
        "*"
    }
}

fn write_table(gene: &str, metrics: &[AlleleMetrics], out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{}", TABLE_HEADERS.join("\t"))?;
    let thresholds = Thresholds::default();
    for m in metrics {
        let qc = m.qc(&thresholds);
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}{}\t{}{}\t{}{}\t{}\t{}\t{}\t{}{}",
            gene,
            m.chrom,
            m.pos,
            m.allele,
            m.read_count,
            qc_mark(qc.read_count),
            m.mean_quality,
            qc_mark(qc.mean_quality),
            m.read_fraction,
            qc_mark(qc.read_fraction),
            m.mean_polylen,
            m.stdev_polylen,
            m.mode_polylen,
            m.poly_purity,
            qc_mark(qc.poly_purity),
        )?;
    }
    Ok(())
}

fn run_metrics(args: MetricsArgs) -> Result<()> {
    let region = PolyRegion::new(args.chrom, args.poly_start, args.poly_end, args.anchor_length)?;
    let config = MetricsConfig {
        region,
        index_path: args.bai,
        threads: args.threads,
    };

    let metrics = calculate_allele_metrics(&args.bam, &config)?;
    info!("{} alleles at {}:{}", metrics.len(), config.region.chrom, config.region.variant_pos());

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    write_table(&args.gene, &metrics, &mut out).context("Failed to write metrics table")?;
    out.flush()?;
    Ok(())
}

fn run_chop(args: ChopArgs) -> Result<()> {
    let region = CutRegion::new(args.chrom, args.poly_start, args.poly_end)?;
    let config = ChopConfig {
        region,
        read_threads: args.threads,
        write_threads: args.threads,
    };
    let stats = chop_bam(&args.input, &args.output, &config)?;
    info!("done: total_reads={} trimmed={}", stats.total_reads, stats.trimmed);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Metrics(args) => run_metrics(args),
        Command::Chop(args) => run_chop(args),
    }
}
