// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::io::Read;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::Result;
use jxlbox::box_header::{write_box_header, BoxInfo, BoxType, CODESTREAM_SIGNATURE};
use jxlbox::compress::{
    compress_to_vec, BoxAction, CompressWhen, CompressionOpts, DecompressWhen,
};
use jxlbox::container::{extract_codestream, merge_jxlp, wrap_codestream};
use jxlbox::error::Error;
use jxlbox::io::{ByteSink, ByteSource, CatSource, FileSink, FileSource, StreamSink, StreamSource};
use jxlbox::reader::BoxReader;
use jxlbox::scan::{copy_box, scan, ScanMode};
use jxlbox::spec::BoxSpec;
use jxlbox_cli::boxarg::{encode_text, parse_box_arg, Encoding, PayloadArg};
use jxlbox_cli::list;
use jxlbox_cli::size::parse_size;

/// Inspect and edit ISO BMFF box streams, with special support for the
/// JPEG XL container format.
#[derive(Parser)]
#[command(name = "jxlbox", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all boxes in the named files
    List {
        files: Vec<String>,
    },
    /// Count boxes matching the given selectors
    Count {
        /// Box selector; may repeat, any match counts
        #[arg(short = 's', long = "spec", value_name = "SPEC")]
        specs: Vec<String>,
        /// Always prefix counts with the file name
        #[arg(short, long)]
        verbose: bool,
        files: Vec<String>,
    },
    /// Succeed if every file has at least one matching box
    Has {
        #[arg(short = 's', long = "spec", value_name = "SPEC")]
        specs: Vec<String>,
        /// Report the result for each file
        #[arg(short, long)]
        verbose: bool,
        files: Vec<String>,
    },
    /// Write the payload of the first matching box to the output
    Extract {
        #[arg(short = 's', long = "spec", value_name = "SPEC")]
        specs: Vec<String>,
        /// Decompress a matching `brob` box instead of copying its payload
        #[arg(long)]
        decompress: bool,
        /// Cap on the decompressed size (e.g. 100M, 1Gi; -1 = unlimited)
        #[arg(
            long = "decompress-max",
            value_name = "SIZE",
            default_value = "unlimited",
            allow_hyphen_values = true
        )]
        decompress_max: String,
        /// One input and one output file; omit both for stdin and stdout
        files: Vec<String>,
    },
    /// Extract the raw JPEG XL codestream from a JXL container file
    ExtractJxlCodestream {
        /// One input and one output file; omit both for stdin and stdout
        files: Vec<String>,
    },
    /// Wrap a raw JPEG XL codestream in a minimal container
    WrapJxlCodestream {
        /// Add a codestream level declaration (a `jxll` box) for level N
        #[arg(short, long, value_name = "N")]
        level: Option<u8>,
        /// Write several `jxlp` boxes instead of a single `jxlc` box,
        /// splitting the codestream at these byte offsets
        #[arg(short, long, value_name = "OFFSET,OFFSET,...", value_delimiter = ',')]
        splits: Option<Vec<u64>>,
        /// One input and one output file; omit both for stdin and stdout
        files: Vec<String>,
    },
    /// Merge each run of consecutive `jxlp` boxes into one box
    MergeJxlp {
        /// One input and one output file; omit both for stdin and stdout
        files: Vec<String>,
    },
    /// Insert new boxes into a box stream
    Add {
        /// Insert before the box at this index (default: append at the end)
        #[arg(long, value_name = "N")]
        at: Option<u64>,
        /// Box to add, as TYPE=TEXT or TYPE@FILE; may repeat
        #[arg(long = "box", value_name = "TYPE=TEXT|TYPE@FILE")]
        boxes: Vec<String>,
        /// Encoding for TYPE=TEXT payloads
        #[arg(long, value_enum, default_value_t)]
        encoding: Encoding,
        #[command(flatten)]
        compression: CompressionArgs,
        /// One input and one output file; omit both for stdin and stdout
        files: Vec<String>,
    },
    /// Copy a box stream, dropping or keeping selected boxes
    Filter {
        /// Drop boxes matching this selector; may repeat
        #[arg(long = "drop", value_name = "SPEC", conflicts_with = "keep")]
        drop: Vec<String>,
        /// Keep only boxes matching this selector; may repeat
        #[arg(long = "keep", value_name = "SPEC")]
        keep: Vec<String>,
        #[command(flatten)]
        compression: CompressionArgs,
        /// One input and one output file; omit both for stdin and stdout
        files: Vec<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum WhenArg {
    Never,
    Auto,
    Always,
}

#[derive(Args, Clone)]
struct CompressionArgs {
    /// When to wrap boxes in Brotli-compressed `brob` boxes
    #[arg(long, value_enum, default_value_t = WhenArg::Never)]
    compress: WhenArg,
    /// Restrict compression to boxes matching these selectors
    #[arg(long = "compress-boxes", value_name = "SPEC")]
    compress_boxes: Vec<String>,
    /// Brotli effort (quality), 0 to 11
    #[arg(long, default_value_t = 11, value_parser = clap::value_parser!(u32).range(0..=11))]
    effort: u32,
    /// Decompress `brob` boxes back into the boxes they wrap
    #[arg(long)]
    decompress: bool,
    /// Restrict decompression to boxes matching these selectors
    #[arg(long = "decompress-boxes", value_name = "SPEC")]
    decompress_boxes: Vec<String>,
    /// Cap on any box's decompressed size (e.g. 100M, 1Gi; -1 = unlimited)
    #[arg(
        long = "decompress-max",
        value_name = "SIZE",
        default_value = "unlimited",
        allow_hyphen_values = true
    )]
    decompress_max: String,
    /// Allow compressing `ftyp`, `jbrd` and `jxl*` boxes
    #[arg(long = "no-protect-jxl")]
    no_protect_jxl: bool,
    /// Allow re-compressing existing `brob` boxes at the configured effort
    #[arg(long)]
    recompress: bool,
}

impl CompressionArgs {
    fn to_opts(&self) -> Result<CompressionOpts, String> {
        Ok(CompressionOpts {
            effort: self.effort,
            compress_when: match self.compress {
                WhenArg::Never => CompressWhen::Never,
                WhenArg::Auto => CompressWhen::Auto,
                WhenArg::Always => CompressWhen::Always,
            },
            compress_boxes: BoxSpec::parse_list(&self.compress_boxes)
                .map_err(|e| e.to_string())?,
            decompress_when: if self.decompress {
                DecompressWhen::Always
            } else {
                DecompressWhen::Never
            },
            decompress_boxes: BoxSpec::parse_list(&self.decompress_boxes)
                .map_err(|e| e.to_string())?,
            decompress_max: parse_size(&self.decompress_max)?,
            protect_jxl: !self.no_protect_jxl,
            recompress: self.recompress,
        })
    }
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::List { files } => cmd_list(&files)?,
        Command::Count {
            specs,
            verbose,
            files,
        } => cmd_count(&specs, verbose, &files)?,
        Command::Has {
            specs,
            verbose,
            files,
        } => cmd_has(&specs, verbose, &files)?,
        Command::Extract {
            specs,
            decompress,
            decompress_max,
            files,
        } => cmd_extract(&specs, decompress, &decompress_max, &files)?,
        Command::ExtractJxlCodestream { files } => cmd_extract_codestream(&files)?,
        Command::WrapJxlCodestream {
            level,
            splits,
            files,
        } => cmd_wrap_codestream(level, splits.as_deref(), &files)?,
        Command::MergeJxlp { files } => cmd_merge_jxlp(&files)?,
        Command::Add {
            at,
            boxes,
            encoding,
            compression,
            files,
        } => cmd_add(at, &boxes, encoding, &compression, &files)?,
        Command::Filter {
            drop,
            keep,
            compression,
            files,
        } => cmd_filter(&drop, &keep, &compression, &files)?,
    };
    Ok(ExitCode::from(code))
}

/// Exit codes: 1 for semantic failures (bad input data, nothing matched),
/// 2 for usage-class failures (bad selectors or sizes, seekability rules,
/// the decompression cap).
fn exit_code(err: &Error) -> u8 {
    match err {
        Error::InvalidBoxSpec(_)
        | Error::TooMuchData { .. }
        | Error::UnseekableInput
        | Error::UnseekableOutput
        | Error::SplitOutOfRange(_)
        | Error::BoxTooLarge(_) => 2,
        _ => 1,
    }
}

fn fail(err: &Error) -> u8 {
    eprintln!("Error: {err}");
    exit_code(err)
}

fn open_source(name: &str) -> Result<Box<dyn ByteSource>, Error> {
    if name == "-" {
        Ok(Box::new(StreamSource::new(std::io::stdin().lock())))
    } else {
        Ok(Box::new(FileSource::open(name)?))
    }
}

fn open_sink(name: &str) -> Result<Box<dyn ByteSink>, Error> {
    if name == "-" {
        Ok(Box::new(StreamSink::new(std::io::stdout().lock())))
    } else {
        Ok(Box::new(FileSink::create(name)?))
    }
}

/// Resolve the `[IN] [OUT]` positional pair; `None` means too many names.
fn resolve_io(files: &[String]) -> Option<(String, String)> {
    match files {
        [] => Some(("-".to_string(), "-".to_string())),
        [input] => Some((input.clone(), "-".to_string())),
        [input, output] => Some((input.clone(), output.clone())),
        _ => None,
    }
}

fn read_upto(src: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut got = 0;
    while got < buf.len() {
        match src.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(got)
}

/// Open a named input for a multi-file read-only command, peeking at the
/// first two bytes for the raw-codestream diagnostic. `Ok(None)` means the
/// input was raw (already reported) or stdin was requested twice.
fn open_boxes_input(
    name: &str,
    used_stdin: &mut bool,
    raw_to_stdout: bool,
) -> Result<Option<CatSource<Box<dyn ByteSource>>>, Error> {
    if name == "-" {
        if *used_stdin {
            eprintln!("stdin can only be read once.");
            return Ok(None);
        }
        *used_stdin = true;
    }
    let mut src = open_source(name)?;
    let mut magic = [0u8; 2];
    let got = read_upto(&mut src, &mut magic)?;
    if got == 2 && magic == CODESTREAM_SIGNATURE {
        let message = format!("{name}: Raw JXL codestream - not a container.");
        if raw_to_stdout {
            println!("{message}");
        } else {
            eprintln!("{message}");
        }
        return Ok(None);
    }
    Ok(Some(CatSource::new(vec![magic[..got].to_vec()], src)))
}

fn cmd_list(files: &[String]) -> Result<u8> {
    let multiple = files.len() > 1;
    let mut used_stdin = false;
    let mut code = 0u8;
    for (fi, name) in files.iter().enumerate() {
        let last = fi + 1 == files.len();
        let src = match open_boxes_input(name, &mut used_stdin, true) {
            Ok(Some(src)) => src,
            Ok(None) => {
                if !last {
                    println!();
                }
                continue;
            }
            Err(err) => {
                eprintln!("{name}: {err}");
                code = code.max(exit_code(&err));
                if !last {
                    eprintln!();
                }
                continue;
            }
        };
        let mut reader = BoxReader::new(src);
        match list::collect_rows(&mut reader) {
            Ok(rows) if rows.is_empty() => {
                println!("{name}: Empty file.");
            }
            Ok(rows) => {
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                list::render(&mut out, multiple.then_some(name.as_str()), &rows)?;
            }
            Err(err) => {
                eprintln!("{name}: Failed to parse as ISO BMFF format; {err}.");
                code = code.max(1);
            }
        }
        if !last {
            println!();
        }
    }
    Ok(code)
}

fn cmd_count(specs: &[String], verbose: bool, files: &[String]) -> Result<u8> {
    let specs = match BoxSpec::parse_list(specs) {
        Ok(specs) => specs,
        Err(err) => return Ok(fail(&err)),
    };
    let multiple = files.len() > 1;
    let mut used_stdin = false;
    let mut code = 0u8;
    for name in files {
        let src = match open_boxes_input(name, &mut used_stdin, false) {
            Ok(Some(src)) => src,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("{name}: {err}");
                code = code.max(exit_code(&err));
                continue;
            }
        };
        match scan(
            src,
            None,
            ScanMode::Count,
            specs.as_deref(),
            &CompressionOpts::default(),
        ) {
            Ok(count) => {
                if multiple || verbose {
                    println!("{name}: {count}");
                } else {
                    println!("{count}");
                }
            }
            Err(err) => {
                eprintln!("{name}: Failed to parse as ISO BMFF format; {err}.");
                code = code.max(1);
            }
        }
    }
    Ok(code)
}

fn cmd_has(specs: &[String], verbose: bool, files: &[String]) -> Result<u8> {
    let specs = match BoxSpec::parse_list(specs) {
        Ok(specs) => specs,
        Err(err) => return Ok(fail(&err)),
    };
    let mut used_stdin = false;
    let mut code = 0u8;
    let mut all_matched = true;
    for name in files {
        let src = match open_boxes_input(name, &mut used_stdin, false) {
            Ok(Some(src)) => src,
            Ok(None) => {
                all_matched = false;
                continue;
            }
            Err(err) => {
                eprintln!("{name}: {err}");
                code = code.max(exit_code(&err));
                all_matched = false;
                continue;
            }
        };
        match scan(
            src,
            None,
            ScanMode::Has,
            specs.as_deref(),
            &CompressionOpts::default(),
        ) {
            Ok(count) => {
                let found = count > 0;
                if verbose {
                    println!("{name}: {}", if found { "yes" } else { "no" });
                }
                all_matched &= found;
            }
            Err(err) => {
                eprintln!("{name}: Failed to parse as ISO BMFF format; {err}.");
                code = code.max(1);
                all_matched = false;
            }
        }
    }
    if code == 0 && !all_matched {
        code = 1;
    }
    Ok(code)
}

fn cmd_extract(
    specs: &[String],
    decompress: bool,
    decompress_max: &str,
    files: &[String],
) -> Result<u8> {
    let specs = match BoxSpec::parse_list(specs) {
        Ok(specs) => specs,
        Err(err) => return Ok(fail(&err)),
    };
    let decompress_max = match parse_size(decompress_max) {
        Ok(max) => max,
        Err(msg) => {
            eprintln!("Error: {msg}");
            return Ok(2);
        }
    };
    let Some((input, output)) = resolve_io(files) else {
        eprintln!("Error: expected at most one input and one output file.");
        return Ok(2);
    };
    let opts = CompressionOpts {
        decompress_when: if decompress {
            DecompressWhen::Always
        } else {
            DecompressWhen::Never
        },
        decompress_max,
        ..CompressionOpts::default()
    };
    let run = || -> Result<u64, Error> {
        let src = open_source(&input)?;
        let mut sink = open_sink(&output)?;
        let matched = scan(
            src,
            Some(&mut *sink),
            ScanMode::ExtractFirst,
            specs.as_deref(),
            &opts,
        )?;
        sink.flush()?;
        Ok(matched)
    };
    match run() {
        Ok(0) => {
            eprintln!("No matching boxes.");
            Ok(1)
        }
        Ok(_) => Ok(0),
        Err(err) => Ok(fail(&err)),
    }
}

fn cmd_extract_codestream(files: &[String]) -> Result<u8> {
    let Some((input, output)) = resolve_io(files) else {
        eprintln!("Error: expected at most one input and one output file.");
        return Ok(2);
    };
    let run = || -> Result<(), Error> {
        let src = open_source(&input)?;
        let mut sink = open_sink(&output)?;
        extract_codestream(src, &mut sink)?;
        sink.flush()?;
        Ok(())
    };
    match run() {
        Ok(()) => Ok(0),
        Err(err) => Ok(fail(&err)),
    }
}

fn cmd_wrap_codestream(level: Option<u8>, splits: Option<&[u64]>, files: &[String]) -> Result<u8> {
    let Some((input, output)) = resolve_io(files) else {
        eprintln!("Error: expected at most one input and one output file.");
        return Ok(2);
    };
    let run = || -> Result<(), Error> {
        let src = open_source(&input)?;
        let mut sink = open_sink(&output)?;
        wrap_codestream(src, &mut *sink, level, splits)?;
        sink.flush()?;
        Ok(())
    };
    match run() {
        Ok(()) => Ok(0),
        Err(err) => Ok(fail(&err)),
    }
}

fn cmd_merge_jxlp(files: &[String]) -> Result<u8> {
    let Some((input, output)) = resolve_io(files) else {
        eprintln!("Error: expected at most one input and one output file.");
        return Ok(2);
    };
    let run = || -> Result<(), Error> {
        let src = open_source(&input)?;
        let mut sink = open_sink(&output)?;
        merge_jxlp(src, &mut *sink)?;
        sink.flush()?;
        Ok(())
    };
    match run() {
        Ok(()) => Ok(0),
        Err(err) => Ok(fail(&err)),
    }
}

fn cmd_add(
    at: Option<u64>,
    box_args: &[String],
    encoding: Encoding,
    compression: &CompressionArgs,
    files: &[String],
) -> Result<u8> {
    let opts = match compression.to_opts() {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("Error: {msg}");
            return Ok(2);
        }
    };
    let mut new_boxes = Vec::new();
    for arg in box_args {
        let (ty, payload) = match parse_box_arg(arg) {
            Ok(parsed) => parsed,
            Err(msg) => {
                eprintln!("Error: {msg}");
                return Ok(2);
            }
        };
        let payload = match payload {
            PayloadArg::Text(text) => match encode_text(&text, encoding) {
                Ok(bytes) => bytes,
                Err(msg) => {
                    eprintln!("Error: {msg}");
                    return Ok(2);
                }
            },
            PayloadArg::File(path) => match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    eprintln!("Error: can't read {}: {err}", path.display());
                    return Ok(1);
                }
            },
        };
        new_boxes.push((ty, payload));
    }
    let Some((input, output)) = resolve_io(files) else {
        eprintln!("Error: expected at most one input and one output file.");
        return Ok(2);
    };
    let run = || -> Result<(), Error> {
        let src = open_source(&input)?;
        let mut sink = open_sink(&output)?;
        do_add(src, &mut *sink, at, &new_boxes, &opts)?;
        sink.flush()?;
        Ok(())
    };
    match run() {
        Ok(()) => Ok(0),
        Err(err) => Ok(fail(&err)),
    }
}

fn do_add(
    src: Box<dyn ByteSource>,
    sink: &mut dyn ByteSink,
    at: Option<u64>,
    new_boxes: &[(BoxType, Vec<u8>)],
    opts: &CompressionOpts,
) -> Result<(), Error> {
    let mut reader = BoxReader::new(src);
    let mut index = 0u64;
    let mut inserted = false;
    while let Some(info) = reader.next_box()? {
        if at == Some(index) {
            emit_new_boxes(sink, new_boxes, index, opts)?;
            inserted = true;
        }
        // When boxes will still follow, an implicit-size final box has to
        // get an explicit size, which needs the input size or output seeks.
        if info.extends_to_eof()
            && !inserted
            && at.map_or(true, |n| n > index)
            && reader.source_total_size().is_none()
            && !sink.is_seekable()
        {
            return Err(Error::UnseekableOutput);
        }
        copy_box(&mut reader, sink, &info)?;
        index += 1;
    }
    if !inserted {
        emit_new_boxes(sink, new_boxes, index, opts)?;
    }
    Ok(())
}

fn emit_new_boxes(
    sink: &mut dyn ByteSink,
    boxes: &[(BoxType, Vec<u8>)],
    start_index: u64,
    opts: &CompressionOpts,
) -> Result<(), Error> {
    for (i, (ty, payload)) in boxes.iter().enumerate() {
        let info = BoxInfo {
            offset: 0,
            length: payload.len() as u64 + 8,
            boxtype: *ty,
            has_extended_size: false,
        };
        let action = opts.action(start_index + i as u64, &info, None, 0);
        if let BoxAction::Compress { auto } = action {
            let compressed = compress_to_vec(payload, opts.effort)?;
            if !auto || compressed.len() as u64 + 4 < payload.len() as u64 {
                write_box_header(sink, BoxType::BROB, Some(compressed.len() as u64 + 4))?;
                sink.write_all(&ty.0)?;
                sink.write_all(&compressed)?;
                continue;
            }
        }
        write_box_header(sink, *ty, Some(payload.len() as u64))?;
        sink.write_all(payload)?;
    }
    Ok(())
}

fn cmd_filter(
    drop: &[String],
    keep: &[String],
    compression: &CompressionArgs,
    files: &[String],
) -> Result<u8> {
    let opts = match compression.to_opts() {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("Error: {msg}");
            return Ok(2);
        }
    };
    let (mode, exprs) = if !drop.is_empty() {
        (ScanMode::Drop, drop)
    } else {
        (ScanMode::Keep, keep)
    };
    let specs = match BoxSpec::parse_list(exprs) {
        Ok(specs) => specs,
        Err(err) => return Ok(fail(&err)),
    };
    let Some((input, output)) = resolve_io(files) else {
        eprintln!("Error: expected at most one input and one output file.");
        return Ok(2);
    };
    let run = || -> Result<(), Error> {
        let src = open_source(&input)?;
        let mut sink = open_sink(&output)?;
        scan(src, Some(&mut *sink), mode, specs.as_deref(), &opts)?;
        sink.flush()?;
        Ok(())
    };
    match run() {
        Ok(()) => Ok(0),
        Err(err) => Ok(fail(&err)),
    }
}
