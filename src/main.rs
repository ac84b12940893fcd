use std::path::{Path, PathBuf};

use log::{debug, info};

use tadpole::config::Config;
use tadpole::errors::TadsError;
use tadpole::hostifc::NullHost;
use tadpole::output::StdSink;
use tadpole::vm::Session;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!("tadpole - TADS2 interpreter for text adventure games");
        println!();
        println!("Usage: {} <game.gam> [--restore save.sav]", args[0]);
        println!();
        println!("Reads tadpole.toml from the game's directory if present");
        println!("(I/O safety levels, undo depth, character map).");
        std::process::exit(0);
    }

    let game_path = PathBuf::from(&args[1]);

    // check for a saved game to restore on startup
    let mut restore_path: Option<PathBuf> = None;
    if args.len() >= 4 && args[2] == "--restore" {
        restore_path = Some(PathBuf::from(&args[3]));
    }

    let game_dir = game_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let config = Config::load_from(&game_dir);
    debug!("config: {config:?}");

    let mut sess = Session::new(config, Box::new(StdSink), Box::new(NullHost));
    sess.init_character_map();

    if let Err(e) = sess.load_game(&game_path) {
        match e {
            TadsError::OpenGame => {
                eprintln!("Error: cannot open game file: {}", game_path.display());
                eprintln!();
                eprintln!("Please check:");
                eprintln!("- the file path is correct");
                eprintln!("- the file exists and is readable");
            }
            TadsError::BadHeader => {
                eprintln!(
                    "Error: {} is not a TADS2 game file",
                    game_path.display()
                );
            }
            TadsError::BadVersion => {
                eprintln!(
                    "Error: {} uses an unsupported format version",
                    game_path.display()
                );
            }
            other => {
                eprintln!("Error loading {}: {other}", game_path.display());
            }
        }
        std::process::exit(1);
    }

    if let Some(save) = restore_path {
        let code = sess.restore(&save);
        if !code.is_success() {
            eprintln!("Error: cannot restore {}: {code:?}", save.display());
            std::process::exit(1);
        }
        info!("restored {}", save.display());
    }

    match sess.command_loop() {
        Ok(()) => {
            debug!("session ended normally");
        }
        Err(e) => {
            eprintln!("Fatal error: {e}");
            std::process::exit(1);
        }
    }
}
