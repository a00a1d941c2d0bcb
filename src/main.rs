use std::path::PathBuf;

use structopt::StructOpt;

use speval::ir::{Const, Type};
use speval::{Analysis, TargetLayout};

#[derive(Clone, Debug, StructOpt)]
struct Options {
    /// The input IR module.
    #[structopt(short = "i")]
    input: PathBuf,

    /// Entry function of the hypothesis.
    #[structopt(long, default_value = "main")]
    entry: String,

    /// Concrete entry arguments, one per parameter; `_` pins nothing.
    #[structopt(long, use_delimiter = true)]
    args: Vec<String>,

    /// Loops to peel, named by their header block label in the entry
    /// function.
    #[structopt(long, use_delimiter = true)]
    peel: Vec<String>,

    /// Assume a big-endian target.
    #[structopt(long)]
    big_endian: bool,
}

fn main() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let opts = Options::from_args();

    let text = std::fs::read_to_string(&opts.input)?;
    let module = speval::parser::parse_module(&text)?;
    let entry = module
        .func_by_name(&opts.entry)
        .ok_or_else(|| anyhow::anyhow!("no function named @{}", opts.entry))?;

    // Parse the hypothesis arguments against the entry signature.
    let params = module.functions[entry].params.clone();
    anyhow::ensure!(
        opts.args.is_empty() || opts.args.len() == params.len(),
        "@{} takes {} parameters, {} arguments given",
        opts.entry,
        params.len(),
        opts.args.len()
    );
    let mut args: Vec<Option<Const>> = Vec::with_capacity(params.len());
    for (i, p) in params.iter().enumerate() {
        let spec = opts.args.get(i).map(|s| s.as_str()).unwrap_or("_");
        if spec == "_" {
            args.push(None);
            continue;
        }
        match module.value_ty(*p) {
            Type::Int(bits) => {
                let v: i64 = spec.parse()?;
                args.push(Some(Const::int(*bits, v)));
            }
            Type::Ptr if spec == "null" => args.push(Some(Const::Null)),
            ty => anyhow::bail!("cannot pin `{}` for a parameter of type {:?}", spec, ty),
        }
    }

    let target = if opts.big_endian { TargetLayout::big_endian() } else { TargetLayout::default() };
    let mut analysis = Analysis::new(module, target, entry, args)?;
    analysis.run();

    let root = analysis.tree.root;
    for peel in &opts.peel {
        let forest = analysis.prog.forest(entry);
        let the_loop = forest
            .loops
            .keys()
            .find(|&l| {
                let header = forest.header(l);
                analysis.prog.module.functions[entry].blocks[header].name == *peel
            })
            .ok_or_else(|| anyhow::anyhow!("no loop with header `{}` in @{}", peel, opts.entry))?;
        analysis.enable_peel(root, the_loop);
    }

    report(&analysis);
    println!("{}", analysis.stats);
    Ok(())
}

/// Print every resolved (singleton) fact, context by context.
fn report(analysis: &Analysis) {
    let module = &analysis.prog.module;
    for (ctx, data) in analysis.tree.ctxs.iter() {
        let mut lines: Vec<String> = Vec::new();
        let mut facts: Vec<_> = data.pointer_bases.iter().collect();
        facts.sort_by_key(|(v, _)| **v);
        for (&v, pb) in facts {
            if pb.is_singleton().is_some() {
                lines.push(format!("  {} = {}", module.display_value(v), pb));
            }
        }
        let mut statuses: Vec<_> = data.forward_status.iter().collect();
        statuses.sort_by_key(|(v, _)| **v);
        for (&v, status) in statuses {
            lines.push(format!("  load {}: {}", module.display_value(v), status));
        }
        if lines.is_empty() {
            continue;
        }
        println!("{} ({}):", ctx, module.functions[analysis.tree.func_of(ctx)].name);
        for line in lines {
            println!("{}", line);
        }
    }
}
