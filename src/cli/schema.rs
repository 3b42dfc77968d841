use std::path::PathBuf;

use clap::Args;

use super::CliContext;
use cardbridge::operations::table;
use cardbridge::schema::write_schema;

#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Directory to write the schemas into
    #[arg(default_value = "schemas")]
    pub out_dir: PathBuf,
}

pub fn execute(args: SchemaArgs, _context: &CliContext) -> anyhow::Result<()> {
    let infos = table()?.infos();
    let written = write_schema(&args.out_dir, &infos)?;
    println!("{written} schemas written to {}", args.out_dir.display());
    Ok(())
}
