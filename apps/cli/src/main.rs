//! Mountrix CLI - Command line interface for fstab management and mounting.
//!
//! Every subcommand maps onto one core operation; anything that touches
//! `/etc/fstab` or calls `mount` usually has to run as root (or with
//! `--sudo`/`--pkexec`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use mountrix_core::executor::PrivilegeEscalation;
use mountrix_core::{Config, MountRecord, MountResult, TemplateInput, fstab, template};

/// Mountrix CLI tool.
#[derive(Parser)]
#[command(name = "mountrix")]
#[command(about = "Manage fstab entries and mount network shares", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.config/mountrix/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Mount table to operate on.
    #[arg(long, global = true)]
    fstab: Option<PathBuf>,

    /// Directory for backups written before each change.
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    /// Run privileged commands through sudo.
    #[arg(long, global = true, conflicts_with = "pkexec")]
    sudo: bool,

    /// Run privileged commands through pkexec.
    #[arg(long, global = true)]
    pkexec: bool,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List entries in the mount table.
    List {
        /// Print JSON instead of fstab lines.
        #[arg(long)]
        json: bool,
    },

    /// Add an entry given its fields.
    Add {
        source: String,
        mountpoint: String,
        fs_type: String,
        #[arg(short, long, default_value = "defaults")]
        options: String,
        #[arg(long, default_value_t = 0)]
        dump: u32,
        #[arg(long, default_value_t = 0)]
        pass: u32,
        #[arg(long)]
        comment: Option<String>,
        /// Replace the existing entry for this mountpoint.
        #[arg(long)]
        replace: bool,
        /// Show the resulting table instead of writing it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Add an entry built from a NAS template.
    AddTemplate(TemplateArgs),

    /// Remove the entry for a mountpoint.
    Remove {
        mountpoint: String,
        #[arg(long)]
        dry_run: bool,
    },

    /// Back up the mount table.
    Backup,

    /// Mount the fstab entry for a mountpoint.
    Mount { mountpoint: String },

    /// Unmount a mountpoint.
    Unmount {
        mountpoint: PathBuf,
        #[arg(short, long)]
        force: bool,
    },

    /// Unmount (if mounted) and mount the fstab entry again.
    Remount { mountpoint: String },

    /// Create a mountpoint directory under /mnt (or /media/<user>).
    Mkdir {
        path: String,
        /// Create under /media/<user> and hand it to the invoking user.
        #[arg(long)]
        user: bool,
    },

    /// Show whether a path is mounted and with what options.
    Status {
        mountpoint: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// List available NAS templates.
    Templates,

    /// Show help for one NAS template.
    TemplateHelp { id: String },
}

#[derive(Args)]
struct TemplateArgs {
    /// Template id (see `mountrix templates`).
    id: String,
    #[arg(long)]
    host: String,
    #[arg(long)]
    mountpoint: String,
    #[arg(long)]
    share: Option<String>,
    #[arg(long)]
    export: Option<String>,
    #[arg(long)]
    username: Option<String>,
    /// Stored in plain text in the mount table; prefer --credentials-file.
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    credentials_file: Option<String>,
    #[arg(long)]
    uid: Option<u32>,
    #[arg(long)]
    gid: Option<u32>,
    /// Use the template's NFS settings instead of its default protocol.
    #[arg(long)]
    nfs: bool,
    #[arg(long)]
    dry_run: bool,
}

impl TemplateArgs {
    fn input(&self) -> TemplateInput {
        TemplateInput {
            host: Some(self.host.clone()),
            share: self.share.clone(),
            export: self.export.clone(),
            mountpoint: Some(self.mountpoint.clone()),
            username: self.username.clone(),
            password: self.password.clone(),
            credentials_file: self.credentials_file.clone(),
            uid: self.uid,
            gid: self.gid,
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> mountrix_core::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(path) = &cli.fstab {
        config.fstab_path = path.clone();
    }
    if let Some(dir) = &cli.backup_dir {
        config.backup_dir = dir.clone();
    }
    if cli.sudo {
        config.escalation = PrivilegeEscalation::Sudo;
    } else if cli.pkexec {
        config.escalation = PrivilegeEscalation::Pkexec;
    }
    Ok(config)
}

fn run(cli: Cli) -> CliResult {
    let config = load_config(&cli)?;
    let table = config.fstab_path.as_path();
    let backups = Some(config.backup_dir.as_path());

    match cli.command {
        Commands::List { json } => {
            let records = fstab::parse_table(table)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!("{}", record.to_fstab_line());
                }
            }
        }
        Commands::Add {
            source,
            mountpoint,
            fs_type,
            options,
            dump,
            pass,
            comment,
            replace,
            dry_run,
        } => {
            let mut record =
                MountRecord::new(source, mountpoint, fs_type, options).with_dump_pass(dump, pass);
            if let Some(comment) = comment {
                record = record.with_comment(comment);
            }
            if replace {
                replace_entry(record, table, backups, dry_run)?;
            } else {
                add(record, table, backups, dry_run)?;
            }
        }
        Commands::AddTemplate(args) => {
            let catalog = config.catalog()?;
            let nas = catalog
                .get(&args.id)
                .ok_or_else(|| mountrix_core::Error::UnknownTemplate { id: args.id.clone() })?;
            let record = template::apply_template(nas, &args.input(), args.nfs)?;
            add(record, table, backups, args.dry_run)?;
        }
        Commands::Remove {
            mountpoint,
            dry_run,
        } => {
            if dry_run {
                let mut records = fstab::parse_table(table)?;
                records.retain(|r| r.mountpoint != mountpoint);
                print!("{}", fstab::preview_changes(&records, table));
            } else if fstab::remove_record(&mountpoint, table, backups)? {
                println!("Removed {}", mountpoint);
            } else {
                println!("No entry for {}", mountpoint);
            }
        }
        Commands::Backup => {
            let path = fstab::backup_table(table, &config.backup_dir)?;
            println!("Backup written to {}", path.display());
        }
        Commands::Mount { mountpoint } => {
            let record = lookup(table, &mountpoint)?;
            report(config.mounter().mount(&record))?;
        }
        Commands::Unmount { mountpoint, force } => {
            report(config.mounter().unmount(&mountpoint, force))?;
        }
        Commands::Remount { mountpoint } => {
            let record = lookup(table, &mountpoint)?;
            report(config.mounter().remount(&record))?;
        }
        Commands::Mkdir { path, user } => {
            report(config.mounter().create_mountpoint(&path, user))?;
        }
        Commands::Status { mountpoint, json } => {
            let info = config.state_reader().mount_info(&mountpoint);
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                match info {
                    Some(live) => println!(
                        "{} mounted from {} ({}) with {}",
                        mountpoint.display(),
                        live.source,
                        live.fs_type,
                        live.options.join(",")
                    ),
                    None => println!("{} is not mounted", mountpoint.display()),
                }
            }
        }
        Commands::Templates => {
            for nas in config.catalog()?.list() {
                println!("{:<14} {:<22} {}", nas.id, nas.name, nas.protocol);
            }
        }
        Commands::TemplateHelp { id } => {
            let help = config
                .catalog()?
                .help(&id)
                .ok_or(mountrix_core::Error::UnknownTemplate { id })?;
            print!("{}", help);
        }
    }

    Ok(())
}

fn add(record: MountRecord, table: &Path, backups: Option<&Path>, dry_run: bool) -> CliResult {
    if dry_run {
        let mut records = if table.exists() {
            fstab::parse_table(table)?
        } else {
            Vec::new()
        };
        records.push(record);
        print!("{}", fstab::preview_changes(&records, table));
        return Ok(());
    }

    fstab::add_record(&record, table, backups)?;
    println!("Added {}", record.to_fstab_line());
    Ok(())
}

fn replace_entry(
    record: MountRecord,
    table: &Path,
    backups: Option<&Path>,
    dry_run: bool,
) -> CliResult {
    if dry_run {
        let records: Vec<MountRecord> = fstab::parse_table(table)?
            .into_iter()
            .map(|r| if r.mountpoint == record.mountpoint { record.clone() } else { r })
            .collect();
        print!("{}", fstab::preview_changes(&records, table));
        return Ok(());
    }

    if !fstab::replace_record(&record, table, backups)? {
        return Err(format!("no fstab entry for {}", record.mountpoint).into());
    }
    println!("Replaced {}", record.to_fstab_line());
    Ok(())
}

fn lookup(table: &Path, mountpoint: &str) -> mountrix_core::Result<MountRecord> {
    fstab::find_record(table, mountpoint)?.ok_or_else(|| mountrix_core::Error::InvalidMountpoint {
        message: format!("no fstab entry for {}", mountpoint),
    })
}

fn report(result: MountResult) -> CliResult {
    if result.success {
        println!("{}", result.message);
        return Ok(());
    }
    Err(result.message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template_args(argv: &[&str]) -> TemplateArgs {
        let mut full = vec!["mountrix", "add-template"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::AddTemplate(args) => args,
            _ => panic!("expected add-template"),
        }
    }

    #[test]
    fn test_template_password_reaches_input() {
        let args = template_args(&[
            "fritznas",
            "--host",
            "fritz.box",
            "--mountpoint",
            "/mnt/fritz",
            "--share",
            "USB",
            "--username",
            "anna",
            "--password",
            "secret",
        ]);

        let input = args.input();
        assert_eq!(input.username.as_deref(), Some("anna"));
        assert_eq!(input.password.as_deref(), Some("secret"));

        let catalog = template::catalog().unwrap();
        let record = template::apply_template(catalog.get("fritznas").unwrap(), &input, false).unwrap();
        assert!(record.options.contains(&"password=secret".to_string()));
    }

    #[test]
    fn test_credentials_file_takes_precedence() {
        let args = template_args(&[
            "fritznas",
            "--host",
            "fritz.box",
            "--mountpoint",
            "/mnt/fritz",
            "--password",
            "secret",
            "--credentials-file",
            "/root/.smbcredentials",
        ]);

        let catalog = template::catalog().unwrap();
        let record =
            template::apply_template(catalog.get("fritznas").unwrap(), &args.input(), false).unwrap();
        assert!(record.options.contains(&"credentials=/root/.smbcredentials".to_string()));
        assert!(!record.options.iter().any(|o| o.starts_with("password=")));
    }
}
