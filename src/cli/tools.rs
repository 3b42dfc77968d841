use clap::Args;

use super::CliContext;
use cardbridge::operations::{catalog, table};

#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Print the `tools/list` payload as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn execute(args: ToolsArgs, _context: &CliContext) -> anyhow::Result<()> {
    let infos = table()?.infos();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&catalog(&infos))?);
        return Ok(());
    }
    for info in &infos {
        let mut flags = Vec::new();
        if info.write {
            flags.push("write");
        }
        if !info.requires_collection {
            flags.push("no-collection");
        }
        if let Some(resource) = &info.resource {
            flags.push(resource.uri.as_str());
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("{:<24}{flags} {}", info.name, info.description);
    }
    Ok(())
}
