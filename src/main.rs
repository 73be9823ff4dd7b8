mod capture;
mod checksum;
mod config;
mod decode;
mod dns;
mod error;
mod export;
mod filter;
mod pipeline;
mod rewrite;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use config::{Mode, Selection};
use pipeline::{Job, RunStats};

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "Edit legacy .pcap captures offline: excise traffic between hosts, mask DNS query names, or export packet fields to CSV.")]
struct Args {
    /// Input .pcap file
    #[arg(short = 'r', long = "read")]
    input: PathBuf,

    /// Output file (.pcap, or .csv with --tocsv)
    #[arg(short = 'w', long = "write", default_value = "./out.pcap")]
    output: PathBuf,

    /// Export IPv4 TCP/UDP packet fields as CSV instead of writing a capture
    #[arg(long, default_value_t = false)]
    tocsv: bool,

    /// Start the CSV with a column header row
    #[arg(long, default_value_t = false, requires = "tocsv")]
    csv_header: bool,

    /// Remove every packet to or from this address
    #[arg(long, value_name = "IP")]
    remove_all: Option<String>,

    /// Replace this substring of DNS query names
    #[arg(long, value_name = "TEXT")]
    mask_dns: Option<String>,

    /// Replacement text for --mask-dns
    #[arg(long, value_name = "TEXT", default_value = rewrite::DEFAULT_REPLACEMENT)]
    mask_with: String,

    /// Remove packets to or from this source address
    #[arg(long, value_name = "IP")]
    removesrc: Option<String>,

    /// With --removesrc: only remove traffic between the source and this address
    #[arg(long, value_name = "IP")]
    removedst: Option<String>,

    /// With --removesrc: remove traffic between the source and anything except this address
    #[arg(long, value_name = "IP")]
    dstipnot: Option<String>,

    /// Snapshot length for the output capture (defaults to the input's)
    #[arg(long)]
    snaplen: Option<u32>,

    /// Print the run summary as JSON to stdout
    #[arg(long, default_value_t = false)]
    report: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

impl Args {
    fn selection(&self) -> Selection {
        Selection {
            removesrc: self.removesrc.clone(),
            removedst: self.removedst.clone(),
            dstipnot: self.dstipnot.clone(),
            remove_all: self.remove_all.clone(),
            mask_dns: self.mask_dns.clone(),
            mask_with: self.mask_with.clone(),
            tocsv: self.tocsv,
            csv_header: self.csv_header,
        }
    }
}

// ─── Summary ──────────────────────────────────────────────────────────────────

fn print_summary(stats: &RunStats, mode: &Mode) {
    println!("=== Edit Summary ===");
    println!("Total packets:        {}", stats.total_packets);
    match mode {
        Mode::Export { .. } => {
            println!("Rows exported:        {}", stats.rows_exported);
        }
        _ => {
            println!("Packets written:      {}", stats.packets_written);
            println!("Packets dropped:      {}", stats.packets_dropped);
            println!("DNS names masked:     {}", stats.packets_rewritten);
            println!("Non-IPv4 passed:      {}", stats.non_ipv4_passed);
        }
    }
    println!("Record errors:        {}", stats.record_errors);
}

// ─── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(log_level).with_target(false).with_writer(std::io::stderr).init();

    let mode = args.selection().resolve().context("Invalid options")?;
    let job = Job {
        input: args.input.clone(),
        output: args.output.clone(),
        mode,
        snaplen: args.snaplen,
        replacement: args.mask_with.clone(),
    };

    let stats = pipeline::run(&job)
        .with_context(|| format!("Editing {:?} → {:?} failed", job.input, job.output))?;
    info!("Wrote {:?}", job.output);

    if args.report {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_summary(&stats, &job.mode);
    }

    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
