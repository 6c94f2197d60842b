//! `kis cache` command

use anyhow::Result;

use kis::ops::cache::{clear_cache, describe_cache};

use crate::cli::{CacheAction, CacheArgs};

pub fn execute(args: CacheArgs) -> Result<()> {
    let (options, _) = super::load(&args.workspace)?;
    let layout = options.layout();

    match args.action {
        CacheAction::Show => print!("{}", describe_cache(&layout)),
        CacheAction::Clear => {
            if clear_cache(&layout)? {
                println!("fingerprint cache cleared");
            } else {
                println!("no fingerprint cache to clear");
            }
        }
    }
    Ok(())
}
