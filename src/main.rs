use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use wkhtmltox::{ImageConverter, Kind, PdfConverter, PdfObject, Progress, Settings};

#[derive(Parser)]
#[command(name = "wkhtmltox", version, about = "Convert HTML to PDF or images with the wkhtmltox library")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render one or more pages into a single PDF
    Pdf(PdfArgs),
    /// Render a page into an image
    Image(ImageArgs),
    /// Print the native library version
    Version,
}

#[derive(Args)]
struct OutputArgs {
    /// Output file, `-` for stdout
    #[arg(short, long)]
    output: String,

    /// Global setting, repeatable
    #[arg(short = 's', long = "set", value_name = "NAME=VALUE", value_parser = Settings::parse_pair)]
    set: Vec<(String, String)>,

    /// JSON object of global settings, applied before --set
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Base64-encode output written to stdout
    #[arg(long)]
    base64: bool,

    /// Print progress as JSON lines on stderr
    #[arg(long)]
    progress: bool,
}

impl OutputArgs {
    fn global_settings(&self) -> Result<Settings> {
        let mut settings = match &self.settings {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading settings file {}", path.display()))?;
                Settings::from_json(&json)?
            }
            None => Settings::new(),
        };
        for (name, value) in &self.set {
            settings.set(name.as_str(), value);
        }
        Ok(settings)
    }

    fn to_stdout(&self) -> bool {
        self.output == "-"
    }

    fn write_stdout(&self, bytes: &[u8]) -> Result<()> {
        let mut out = io::stdout().lock();
        if self.base64 {
            writeln!(out, "{}", base64::engine::general_purpose::STANDARD.encode(bytes))?;
        } else {
            out.write_all(bytes)?;
        }
        out.flush()?;
        Ok(())
    }
}

#[derive(Args)]
struct PdfArgs {
    /// URLs or local HTML files, rendered in order
    inputs: Vec<String>,

    /// Read an HTML document from stdin and append it after the inputs
    #[arg(long)]
    stdin: bool,

    /// Setting applied to every object, repeatable
    #[arg(short = 'O', long = "object-set", value_name = "NAME=VALUE", value_parser = Settings::parse_pair)]
    object_set: Vec<(String, String)>,

    #[command(flatten)]
    out: OutputArgs,
}

#[derive(Args)]
struct ImageArgs {
    /// URL, local HTML file, or `-` for HTML on stdin
    input: String,

    /// jpg, png, bmp or svg
    #[arg(long)]
    format: Option<String>,

    #[command(flatten)]
    out: OutputArgs,
}

fn read_stdin() -> Result<String> {
    let mut html = String::new();
    io::stdin().read_to_string(&mut html).context("reading HTML from stdin")?;
    Ok(html)
}

fn file_url(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)?;
    url::Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .map_err(|_| anyhow::anyhow!("cannot build a file URL for {}", path.display()))
}

fn print_progress(p: &Progress) {
    if let Ok(line) = serde_json::to_string(p) {
        eprintln!("{}", line);
    }
}

fn run_pdf(args: PdfArgs) -> Result<()> {
    let object_settings: Settings = args.object_set.iter().cloned().collect();

    let mut objects = Vec::new();
    for input in &args.inputs {
        let object = if input.contains("://") {
            PdfObject::for_url(input.as_str())
        } else {
            PdfObject::for_file(input)?
        };
        objects.push(object);
    }
    if args.stdin {
        objects.push(PdfObject::for_html(read_stdin()?)?);
    }
    if objects.is_empty() {
        bail!("nothing to convert: pass at least one input or --stdin");
    }

    let mut converter = PdfConverter::with_settings(args.out.global_settings()?)
        .on_warning(|w| log::warn!("{}", w))
        .on_error(|e| log::error!("{}", e));
    if args.out.progress {
        converter = converter.on_progress(print_progress);
    }
    for mut object in objects {
        for (name, value) in object_settings.iter() {
            object = object.setting(name, value);
        }
        converter = converter.object(object);
    }

    if args.out.to_stdout() {
        let bytes = converter.render_to_stream()?;
        args.out.write_stdout(&bytes)
    } else if converter.render_to_path(&args.out.output)? {
        Ok(())
    } else {
        bail!("PDF conversion to {} failed", args.out.output)
    }
}

fn run_image(args: ImageArgs) -> Result<()> {
    let mut converter = if args.input == "-" {
        ImageConverter::from_html(read_stdin()?)
    } else if args.input.contains("://") {
        ImageConverter::from_url(args.input.as_str())
    } else {
        ImageConverter::from_url(file_url(Path::new(&args.input))?)
    };
    converter = converter
        .settings(&args.out.global_settings()?)
        .on_warning(|w| log::warn!("{}", w))
        .on_error(|e| log::error!("{}", e));
    if let Some(format) = &args.format {
        converter = converter.format(format);
    }
    if args.out.progress {
        converter = converter.on_progress(print_progress);
    }

    if args.out.to_stdout() {
        let bytes = converter.render_to_stream()?;
        args.out.write_stdout(&bytes)
    } else if converter.render_to_path(&args.out.output)? {
        Ok(())
    } else {
        bail!("image conversion to {} failed", args.out.output)
    }
}

fn run_version() -> Result<()> {
    for kind in [Kind::Pdf, Kind::Image] {
        let version = wkhtmltox::version(kind)?;
        let patched = wkhtmltox::extended_qt(kind)?;
        println!(
            "{} {}{}",
            kind,
            version,
            if patched { " (with patched qt)" } else { "" }
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Pdf(args) => run_pdf(args),
        Command::Image(args) => run_image(args),
        Command::Version => run_version(),
    }
}
