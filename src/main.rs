use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io;
use std::path::Path;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use trfs::cli::{Cli, Command};
use trfs::control::TRFS_IOC_SET_MASK;
use trfs::lower::LowerStorage;
use trfs::trace::{self, TraceEvent, TraceFormat};
use trfs::{TracedFile, TracedFs};

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Copy {
            lower,
            options,
            mask,
            chunk,
            src,
            dst,
        } => copy(&lower, &options, mask, chunk, &src, &dst),
        Command::Dump { trace, preview } => dump(&trace, preview),
        Command::Convert {
            input,
            output,
            format,
        } => {
            let output_format = TraceFormat::resolve(&output, format)?;
            trace::convert(&input, &output, output_format)
        }
        Command::Verify { trace } => verify(&trace),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn copy(
    lower: &Path,
    options: &str,
    mask: Option<u32>,
    chunk: usize,
    src: &Path,
    dst: &Path,
) -> Result<()> {
    if chunk == 0 {
        bail!("chunk size must be positive");
    }
    let fs = TracedFs::mount(lower, options)
        .with_context(|| format!("failed to mount traced layer over {}", lower.display()))?;

    if let Some(mask) = mask {
        let mut arg = mask.to_ne_bytes();
        fs.ioctl(TRFS_IOC_SET_MASK, Some(&mut arg[..]))
            .context("failed to install trace mask")?;
    }

    let mut input = fs
        .open(src, libc::O_RDONLY)
        .with_context(|| format!("failed to open {}", src.display()))?;
    let mut output = match fs.open(dst, libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC) {
        Ok(output) => output,
        Err(err) => {
            fs.release(input);
            return Err(err).with_context(|| format!("failed to create {}", dst.display()));
        }
    };

    let mut buf = vec![0u8; chunk];
    let copied = pump(&fs, &mut input, &mut output, &mut buf);
    fs.release(input);
    fs.release(output);

    let copied = copied.with_context(|| {
        format!("failed to copy {} to {}", src.display(), dst.display())
    })?;
    println!("copied {} bytes", copied);
    Ok(())
}

fn pump<L: LowerStorage>(
    fs: &TracedFs<L>,
    input: &mut TracedFile<L::Handle>,
    output: &mut TracedFile<L::Handle>,
    buf: &mut [u8],
) -> io::Result<u64> {
    let mut copied = 0u64;
    loop {
        let n = fs.read(input, buf)?;
        if n == 0 {
            return Ok(copied);
        }
        let mut pending = &buf[..n];
        while !pending.is_empty() {
            let written = fs.write(output, pending)?;
            if written == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero));
            }
            pending = &pending[written..];
        }
        copied += n as u64;
    }
}

fn dump(path: &Path, preview: usize) -> Result<()> {
    for event in trace::read_trace(path)? {
        println!("{}", describe(&event, preview));
    }
    Ok(())
}

fn describe(event: &TraceEvent, preview: usize) -> String {
    match event {
        TraceEvent::Open {
            record_id,
            flags,
            mode,
            path,
            result,
        } => format!(
            "#{record_id} open path={path:?} flags={flags:#o} mode={mode:#o} result={result}"
        ),
        TraceEvent::Read {
            record_id,
            open_record_id,
            count,
            result,
            data,
        } => format!(
            "#{record_id} read open={open_record_id} count={count} result={result} data={}",
            hex_preview(data, preview)
        ),
        TraceEvent::Write {
            record_id,
            open_record_id,
            count,
            data,
            result,
        } => format!(
            "#{record_id} write open={open_record_id} count={count} result={result} data={}",
            hex_preview(data, preview)
        ),
        TraceEvent::Close {
            record_id,
            open_record_id,
        } => format!("#{record_id} close open={open_record_id}"),
    }
}

fn hex_preview(data: &[u8], preview: usize) -> String {
    if data.len() <= preview {
        hex::encode(data)
    } else {
        format!("{}...", hex::encode(&data[..preview]))
    }
}

fn verify(path: &Path) -> Result<()> {
    let events = trace::read_trace(path)?;
    let violations = trace::verify(&events);
    if violations.is_empty() {
        println!("{}: {} records, ok", path.display(), events.len());
        return Ok(());
    }
    for violation in &violations {
        eprintln!("{}", violation);
    }
    bail!(
        "{}: {} violations in {} records",
        path.display(),
        violations.len(),
        events.len()
    )
}
