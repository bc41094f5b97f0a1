use std::io::{self, BufRead, Write};

use anyhow::Result;
use clap::Parser;

use manga_llm_translator::{Config, Settings};

#[derive(Parser, Debug)]
#[command(
    name = "manga-llm-translator",
    version,
    about = "Capture manga pages and translate them with Gemini"
)]
struct Cli {
    /// Translate this image instead of capturing the screen
    #[arg(short = 'd', long = "image")]
    image: Option<String>,

    /// Capture, crop and save one page as {prefix}.jpeg
    #[arg(long = "save-screenshot")]
    save_screenshot: bool,

    /// Capture N consecutive pages as {prefix}1.jpeg .. {prefix}N.jpeg
    #[arg(long = "capture-book", value_name = "N")]
    capture_book: Option<u32>,

    /// Translate every image in a directory, writing name.txt next to each
    #[arg(long = "translate-dir", value_name = "DIR")]
    translate_dir: Option<String>,

    /// List images in a directory and whether their text exists
    #[arg(long = "list", value_name = "DIR")]
    list: Option<String>,

    /// Re-translate images that already have a text file
    #[arg(long = "overwrite")]
    overwrite: bool,

    /// Run the batch web server
    #[arg(long = "server")]
    server: bool,

    /// Server bind address (default from settings, 127.0.0.1:5173)
    #[arg(long = "addr")]
    addr: Option<String>,

    /// Gemini API key (overrides settings and environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Gemini model name (default: gemini-2.5-flash)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Prompt sent before the image
    #[arg(short = 'p', long = "prompt")]
    prompt: Option<String>,

    /// Border brightness threshold (0-255)
    #[arg(short = 't', long = "threshold")]
    threshold: Option<u8>,

    /// JPEG quality in (0, 1]
    #[arg(short = 'q', long = "quality")]
    quality: Option<f32>,

    /// File name prefix for saved screenshots
    #[arg(long = "image-prefix")]
    image_prefix: Option<String>,

    /// Directory for saved screenshots
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<String>,

    /// Save --key, --image-prefix, --quality and --threshold to the local settings file
    #[arg(long = "save-config")]
    save_config: bool,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Append token usage to output
    #[arg(long = "with-using-tokens")]
    with_using_tokens: bool,

    /// Append model name to output
    #[arg(long = "with-using-model")]
    with_using_model: bool,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,

    /// Interactive mode
    #[arg(short = 'i', long = "interactive")]
    interactive: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            key: self.key.clone(),
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            threshold: self.threshold,
            quality: self.quality,
            image_prefix: self.image_prefix.clone(),
            output_dir: self.output_dir.clone(),
            settings_path: self.read_settings.clone(),
            image: self.image.clone(),
            save_screenshot: self.save_screenshot,
            capture_book: self.capture_book,
            translate_dir: self.translate_dir.clone(),
            list: self.list.clone(),
            overwrite: self.overwrite,
            save_config: self.save_config,
            with_using_tokens: self.with_using_tokens,
            with_using_model: self.with_using_model,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    manga_llm_translator::logging::init(cli.verbose)?;

    if cli.server {
        let settings = manga_llm_translator::resolve_settings(&cli.config())?;
        let addr = cli.addr.clone().unwrap_or_else(|| settings.server_addr.clone());
        return manga_llm_translator::server::run_server(settings, addr).await;
    }
    if cli.interactive {
        let config = cli.config();
        let settings = manga_llm_translator::resolve_settings(&config)?;
        return run_interactive(config, settings).await;
    }

    let output = manga_llm_translator::run(cli.config()).await?;
    println!("{}", output);
    Ok(())
}

async fn run_interactive(config: Config, settings: Settings) -> Result<()> {
    println!("Interactive mode. Press Enter to translate the current page.");
    println!("Type /help to see available commands.");

    let mut line = String::new();
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();
    loop {
        line.clear();
        print!("> ");
        io::stdout().flush()?;
        if stdin_lock.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        let run_config = match input {
            "/quit" | "/exit" => break,
            "/help" => {
                print_interactive_help();
                continue;
            }
            "" | "/translate" => config.clone(),
            "/save" => Config {
                save_screenshot: true,
                ..config.clone()
            },
            _ => match input.strip_prefix("/book ") {
                Some(count) => match count.trim().parse::<u32>() {
                    Ok(total) => Config {
                        capture_book: Some(total),
                        ..config.clone()
                    },
                    Err(_) => {
                        println!("usage: /book <pages>");
                        continue;
                    }
                },
                None => {
                    println!("unknown command: {} (try /help)", input);
                    continue;
                }
            },
        };
        // Failures end only this action, not the session.
        match manga_llm_translator::run_with_settings(&run_config, &settings).await {
            Ok(output) => println!("{}", output),
            Err(err) => println!("error: {:#}", err),
        }
    }
    Ok(())
}

fn print_interactive_help() {
    println!("Commands:");
    println!("  <Enter>, /translate  capture and translate the current page");
    println!("  /save                save the current page as {{prefix}}.jpeg");
    println!("  /book <pages>        capture <pages> pages as {{prefix}}N.jpeg");
    println!("  /quit, /exit         leave interactive mode");
}
