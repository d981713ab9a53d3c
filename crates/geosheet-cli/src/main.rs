//! GeoSheet 命令行外壳
//!
//! 逐行读取命令：以 `:` 开头的是外壳命令，其余交给工作表执行。

use anyhow::{bail, Context, Result};
use clap::Parser;
use geosheet_core::config::WorksheetConfig;
use geosheet_core::worksheet::Worksheet;
use geosheet_file::{native, text, Document};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// GeoSheet - 命名几何对象的工作表
#[derive(Parser)]
#[command(name = "geosheet")]
#[command(about = "Interactive worksheet of named geometric objects")]
struct Cli {
    /// JSON 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 启动时打开的文档（.geos、.txt 或 .json）
    #[arg(short, long)]
    open: Option<PathBuf>,

    /// 以容错模式打开旧文档
    #[arg(long)]
    tolerant: bool,

    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: Level,
}

const HELP: &str = "\
:undo | :redo          undo or redo the last change
:save <path>           save (.geos, .txt or .json)
:open <path>           open a document
:text                  print the canonical text
:list                  list entities
:macro <name>          run a macro
:zoom <factor>         zoom around the window centre
:quit                  exit";

/// 外壳状态：工作表与其对应的文档
struct Shell {
    sheet: Worksheet,
    document: Document,
    tolerant: bool,
}

impl Shell {
    fn new(config: WorksheetConfig, tolerant: bool) -> Self {
        Self {
            sheet: Worksheet::with_config(config),
            document: Document::new(),
            tolerant,
        }
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        let document = match extension(path) {
            "txt" => text::import_text(path),
            "json" => text::import_json(path),
            _ => native::load(path),
        }
        .with_context(|| format!("cannot read {}", path.display()))?;
        let skipped = document.apply(&mut self.sheet, self.tolerant)?;
        if skipped > 0 {
            println!("{} lines skipped", skipped);
        }
        self.document = document;
        info!("opened {}", path.display());
        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        self.document.capture(&self.sheet);
        if self.document.metadata.title.is_empty() {
            if let Some(stem) = path.file_stem() {
                self.document.metadata.title = stem.to_string_lossy().into_owned();
            }
        }
        match extension(path) {
            "txt" => text::export_text(&self.document, path),
            "json" => text::export_json(&self.document, path),
            _ => native::save(&self.document, path),
        }
        .with_context(|| format!("cannot write {}", path.display()))?;
        self.sheet.mark_saved();
        Ok(())
    }

    /// 处理一行输入；返回 `false` 表示退出
    fn handle(&mut self, line: &str) -> Result<bool> {
        let Some(command) = line.strip_prefix(':') else {
            let output = self.sheet.execute(line)?;
            if !output.is_empty() {
                println!("{}", output);
            }
            return Ok(true);
        };

        let (name, argument) = match command.split_once(' ') {
            Some((name, argument)) => (name, argument.trim()),
            None => (command, ""),
        };
        match (name, argument) {
            ("quit" | "q", _) => {
                if self.sheet.is_modified() {
                    println!("(unsaved changes discarded)");
                }
                return Ok(false);
            }
            ("undo", _) => {
                if !self.sheet.undo()? {
                    println!("nothing to undo");
                }
            }
            ("redo", _) => {
                if !self.sheet.redo()? {
                    println!("nothing to redo");
                }
            }
            ("text", _) => println!("{}", self.sheet.save()),
            ("list", _) => {
                for line in self.sheet.inventory() {
                    println!("{}", line);
                }
            }
            ("save" | "open" | "macro" | "zoom", "") => bail!(":{} needs an argument", name),
            ("save", path) => self.save(Path::new(path))?,
            ("open", path) => self.open(Path::new(path))?,
            ("macro", macro_name) => {
                let output = self.sheet.run_macro(macro_name)?;
                println!("{}", output);
            }
            ("zoom", factor) => {
                let factor: f64 = factor
                    .parse()
                    .with_context(|| format!("invalid zoom factor '{}'", factor))?;
                self.sheet.zoom(factor)?;
            }
            ("help" | "h", _) => println!("{}", HELP),
            _ => bail!("unknown command ':{}' (try :help)", name),
        }
        Ok(true)
    }
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or(native::EXTENSION)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(cli.log_level)
            .with_writer(io::stderr)
            .finish(),
    )?;

    let config = match &cli.config {
        Some(path) => WorksheetConfig::load(path)?,
        None => WorksheetConfig::default(),
    };
    let mut shell = Shell::new(config, cli.tolerant);
    if let Some(path) = &cli.open {
        shell.open(path)?;
    }

    info!("Starting GeoSheet...");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        print!(">>> ");
        stdout.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim_end();
        if input.trim().is_empty() {
            continue;
        }
        match shell.handle(input) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => println!("{:#}", err),
        }
    }
    Ok(())
}
