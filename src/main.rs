//! `brotli` — compress or decompress files (or stdio) with the library's
//! streaming codec.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use brotli::{Reader, Writer, WriterOptions};

#[derive(Parser)]
#[command(name = "brotli", version, about = "Brotli compressor/decompressor")]
struct Args {
    /// Decompress instead of compressing.
    #[arg(short, long)]
    decompress: bool,

    /// Compression quality, 0 (fastest) to 11 (densest).
    #[arg(short, long, default_value_t = 6, value_parser = clap::value_parser!(i32).range(0..=11))]
    quality: i32,

    /// Sliding window size as log2, 10 to 24 (0 = default).
    #[arg(short = 'w', long, default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..=24))]
    lgwin: u32,

    /// Write to standard output.
    #[arg(short = 'c', long)]
    stdout: bool,

    /// Output file (defaults to INPUT.br / INPUT without .br).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Input file; standard input when absent.
    input: Option<PathBuf>,
}

fn open_input(path: &Option<PathBuf>) -> Result<Box<dyn Read>> {
    Ok(match path {
        Some(p) => Box::new(File::open(p).with_context(|| format!("opening {}", p.display()))?),
        None => Box::new(io::stdin().lock()),
    })
}

fn open_output(args: &Args) -> Result<Box<dyn Write>> {
    if args.stdout || (args.input.is_none() && args.output.is_none()) {
        return Ok(Box::new(io::stdout().lock()));
    }
    let path = match &args.output {
        Some(p) => p.clone(),
        None => {
            let input = args.input.as_ref().expect("either input or output is set");
            if args.decompress {
                let s = input.to_string_lossy();
                match s.strip_suffix(".br") {
                    Some(stem) => PathBuf::from(stem),
                    None => bail!("cannot derive output name from {} (no .br suffix)", s),
                }
            } else {
                let mut p = input.clone().into_os_string();
                p.push(".br");
                PathBuf::from(p)
            }
        }
    };
    Ok(Box::new(
        File::create(&path).with_context(|| format!("creating {}", path.display()))?,
    ))
}

fn run(args: &Args) -> Result<()> {
    let mut input = open_input(&args.input)?;
    let output = open_output(args)?;

    if args.decompress {
        let mut reader = Reader::new(input);
        let mut output = output;
        io::copy(&mut reader, &mut output).context("decompressing")?;
        output.flush()?;
    } else {
        let mut writer = Writer::new(
            output,
            WriterOptions {
                quality: args.quality,
                lgwin: args.lgwin,
            },
        );
        io::copy(&mut input, &mut writer).context("compressing")?;
        writer.close().context("finishing stream")?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    run(&args)
}
