use clap_markdown::help_markdown;
use trfs::cli::Cli;

fn main() {
    // Print header
    println!("# trfs CLI Reference");
    println!();
    println!("This page contains the auto-generated reference documentation for the `trfs` command-line interface.");
    println!();

    println!("{}", help_markdown::<Cli>());
}
