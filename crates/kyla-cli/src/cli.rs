use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(
    name = "kyla",
    version,
    about = "Content-addressed software installer",
    propagate_version = true
)]
pub struct KylaCli {
    #[arg(
        short = 'l',
        long,
        global = true,
        help = "Forward engine log records to stderr"
    )]
    pub log: bool,
    #[arg(short = 'p', long, global = true, help = "Show progress")]
    pub progress: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(about = "Build a repository from a build descriptor")]
    Build(BuildArgs),
    #[command(about = "Validate every content object of a repository")]
    Validate(ValidateArgs),
    #[command(about = "Repair a repository from a good source")]
    Repair(RepairArgs),
    #[command(
        name = "query-filesets",
        about = "List the file sets a repository offers"
    )]
    QueryFilesets(QueryFilesetsArgs),
    #[command(about = "Deploy selected file sets from a source into an empty target")]
    Install(SelectionArgs),
    #[command(about = "Reconcile an installed target against a file set selection")]
    Configure(SelectionArgs),
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    pub descriptor: PathBuf,
    pub output_directory: PathBuf,
    #[arg(
        long,
        default_value = ".",
        help = "Directory descriptor source paths resolve against"
    )]
    pub source_directory: PathBuf,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    pub repository: PathBuf,
    #[arg(short, long, help = "Print one line per validated object")]
    pub verbose: bool,
    #[arg(
        short,
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Print the Ok and fault totals"
    )]
    pub summary: bool,
}

#[derive(Args, Debug)]
pub struct RepairArgs {
    pub source: PathBuf,
    pub target: PathBuf,
}

#[derive(Args, Debug)]
pub struct QueryFilesetsArgs {
    pub repository: PathBuf,
    #[arg(short = 'n', long = "names", help = "Also print each file set's name")]
    pub names: bool,
}

#[derive(Args, Debug)]
pub struct SelectionArgs {
    pub source: PathBuf,
    pub target: PathBuf,
    #[arg(required = true, help = "File set ids to leave installed")]
    pub filesets: Vec<Uuid>,
}
