use clap::{ArgAction, Parser};
use std::error::Error;
use std::io::{stdin, stdout, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, error, LevelFilter};

use crate::config::PlayerConfig;
use crate::device::list_ports;
use crate::error::Result;
use crate::player::MidiPlayer;
use crate::resource::{scan_directory, SongResource};
use crate::{set_shutdown_flag, should_shutdown};

#[derive(Parser, Debug)]
#[command(name = "e_midi_engine")]
#[command(about = "Play MIDI files through a system MIDI output with a live-editable playlist")]
#[command(version)]
#[command(author = "David Horner <david.horner@example.com>")]
pub struct Cli {
    /// MIDI files, file:// URLs or directories to queue
    pub inputs: Vec<String>,

    /// Repeat the current song forever
    #[arg(long)]
    pub loop_song: bool,

    /// Wrap around to the first song after the last one
    #[arg(long)]
    pub loop_playlist: bool,

    /// Tempo factor (1.0 = as written, 2.0 = twice as fast)
    #[arg(long)]
    pub tempo: Option<f32>,

    /// Output port to use (case-insensitive substring of the port name)
    #[arg(long)]
    pub port: Option<String>,

    /// JSON configuration file; flags override its values
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    /// Shuffle the playlist before playing
    #[arg(long)]
    pub shuffle: bool,

    /// Seed for --shuffle, for a repeatable order
    #[arg(long, requires = "shuffle")]
    pub seed: Option<u64>,

    /// Sort the playlist by name before playing
    #[arg(long, conflicts_with = "shuffle")]
    pub sort: bool,

    /// List MIDI output ports and exit
    #[arg(long)]
    pub list_ports: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

/// One line typed at the interactive prompt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Next,
    Previous,
    Jump(usize),
    Pause,
    Restart,
    Tempo(f32),
    ToggleSongLoop,
    TogglePlaylistLoop,
    Info,
    List,
    Stop,
    Quit,
    Help,
}

pub fn parse_command(input: &str) -> Option<Command> {
    // a lone space is the pause key, so look at it before trimming
    if input.trim_end_matches(['\r', '\n']) == " " {
        return Some(Command::Pause);
    }
    let input = input.trim();
    match input {
        "n" => Some(Command::Next),
        "p" => Some(Command::Previous),
        "s" => Some(Command::Pause),
        "r" => Some(Command::Restart),
        "l" => Some(Command::ToggleSongLoop),
        "L" => Some(Command::TogglePlaylistLoop),
        "i" => Some(Command::Info),
        "ls" => Some(Command::List),
        "x" => Some(Command::Stop),
        "q" => Some(Command::Quit),
        "h" | "?" => Some(Command::Help),
        _ => {
            if let Some(factor) = input.strip_prefix('t') {
                return factor.trim().parse().ok().map(Command::Tempo);
            }
            input.parse().ok().map(Command::Jump)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut clog = colog::default_builder();
    clog.filter(None, level);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        error!("panic in thread '{}': {}", thread_name, panic_info);
    }));
}

/// Config file (if any) with command line flags applied on top
pub fn build_config(cli: &Cli) -> Result<PlayerConfig> {
    let mut config = match &cli.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };
    if cli.loop_song {
        config.song_looping = true;
    }
    if cli.loop_playlist {
        config.playlist_looping = true;
    }
    if let Some(tempo) = cli.tempo {
        config.tempo_factor = tempo;
    }
    if cli.port.is_some() {
        config.port = cli.port.clone();
    }
    config.validate()?;
    Ok(config)
}

/// Expand directories into the MIDI files they contain
pub fn collect_resources(inputs: &[String]) -> Vec<SongResource> {
    let mut resources = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if path.is_dir() {
            match scan_directory(path) {
                Ok(found) => {
                    println!("✅ Added {} songs from {}", found.len(), path.display());
                    resources.extend(found);
                }
                Err(e) => eprintln!("❌ Failed to scan {}: {}", path.display(), e),
            }
            continue;
        }
        let resource = SongResource::from(input.as_str());
        if resource.is_valid() {
            resources.push(resource);
        } else {
            eprintln!("❌ Not a playable resource: {}", input);
        }
    }
    resources
}

pub fn run_cli() -> std::result::Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = build_config(&cli)?;

    if cli.list_ports {
        let ports = list_ports(&config.client_name)?;
        if ports.is_empty() {
            println!("❌ No MIDI output ports found!");
        }
        for (i, name) in ports.iter().enumerate() {
            println!("  {}: {}", i, name);
        }
        return Ok(());
    }

    let player = Arc::new(MidiPlayer::with_midir(config));
    player.set_error_handler(|message, err| eprintln!("❌ {}: {}", message, err));

    let player_for_ctrlc = Arc::clone(&player);
    ctrlc::set_handler(move || {
        println!("\n🛑 Ctrl+C received, stopping playback...");
        set_shutdown_flag();
        player_for_ctrlc.close();
        std::process::exit(0);
    })?;

    player.add_all(collect_resources(&cli.inputs));
    if cli.shuffle {
        player.shuffle(cli.seed);
    } else if cli.sort {
        player.sort();
    }

    if player.is_empty() {
        println!("💡 Nothing to play. Pass MIDI files or directories on the command line.");
        return Ok(());
    }

    print_song_list(&player);
    if !player.start_playing() {
        eprintln!("❌ Could not start playback");
    }
    print_help();
    run_interactive(&player)?;

    player.close();
    println!("👋 Goodbye!");
    Ok(())
}

pub fn run_interactive(player: &MidiPlayer) -> std::result::Result<(), Box<dyn Error>> {
    loop {
        if should_shutdown() {
            println!("🛑 Shutdown requested, exiting interactive mode");
            break;
        }
        print!("🎹 > ");
        stdout().flush()?;

        let mut input = String::new();
        // EOF means stdin is closed
        if stdin().read_line(&mut input)? == 0 {
            break;
        }
        if input.trim().is_empty() && input.trim_end_matches(['\r', '\n']) != " " {
            continue;
        }
        match parse_command(&input) {
            Some(command) => {
                debug!("Command: {:?}", command);
                if !execute(player, command) {
                    break;
                }
            }
            None => println!("❓ Unknown command '{}' (h for help)", input.trim()),
        }
    }
    Ok(())
}

/// Apply one command; false means quit
pub fn execute(player: &MidiPlayer, command: Command) -> bool {
    match command {
        Command::Next => {
            if !player.move_to_next_song() {
                println!("⏭️  Already at the last song");
            }
        }
        Command::Previous => {
            if !player.move_to_previous_song() {
                println!("⏮️  Already at the first song");
            }
        }
        Command::Jump(index) => {
            if !player.start_playing_at(index) {
                println!("❌ Invalid song index {}. Available songs: 0-{}", index, player.len().saturating_sub(1));
            }
        }
        Command::Pause => {
            if !player.pause_playing() {
                println!("💡 Nothing is loaded");
            } else if player.is_paused() {
                println!("⏸️  Paused");
            } else {
                println!("▶️  Resumed");
            }
        }
        Command::Restart => {
            if !player.start_playing() {
                println!("❌ Could not start playback");
            }
        }
        Command::Tempo(factor) => {
            if player.set_tempo_factor(factor) {
                println!("🎼 Tempo x{}", factor);
            } else {
                println!("❌ Tempo factor must be positive");
            }
        }
        Command::ToggleSongLoop => {
            let looping = !player.song_looping();
            player.set_song_looping(looping);
            println!("🔁 Loop song: {}", on_off(looping));
        }
        Command::TogglePlaylistLoop => {
            let looping = !player.playlist_looping();
            player.set_playlist_looping(looping);
            println!("🔁 Loop playlist: {}", on_off(looping));
        }
        Command::Info => match player.song_info() {
            Some(info) => println!("🎵 {} [{:?}]", info, player.playback_state()),
            None => println!("💤 Nothing loaded"),
        },
        Command::List => print_song_list(player),
        Command::Stop => {
            player.stop_playing();
        }
        Command::Quit => return false,
        Command::Help => print_help(),
    }
    true
}

fn on_off(value: bool) -> &'static str {
    if value {
        "✅ ON"
    } else {
        "❌ OFF"
    }
}

pub fn print_help() {
    println!("\n🎮 Controls:");
    println!("  n: next song        p: previous song   <number>: play song");
    println!("  s/space: pause      r: restart         t<factor>: tempo");
    println!("  l: loop song        L: loop playlist   i: song info");
    println!("  ls: list songs      x: stop            q: quit");
}

pub fn print_song_list(player: &MidiPlayer) {
    println!("\n🎵 Playlist:");
    let current = player.current_index();
    for (i, song) in player.resources().iter().enumerate() {
        let marker = if i == current { "▶" } else { " " };
        println!("{} {}: {}", marker, i, song.name());
    }
}
