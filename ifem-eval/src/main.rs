use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Result;
use clap::Parser;

use ifem::comm::LocalComm;
use ifem::config::load_parameters;
use ifem::FsiDriver;

const ABOUT: &str = "
Ifem is a partitioned fluid-structure interaction simulator: a linear-elastic
body immersed in an incompressible fluid on a shared indicator-tagged mesh.";

#[derive(Parser)]
#[clap(author, about = ABOUT, name = "ifem")]
struct Opt {
    /// Path to the run configuration file.
    ///
    /// The file is expected to be in RON format; the run mode recorded in it
    /// selects stand-alone solid, stand-alone fluid or coupled FSI.
    #[clap(name = "CONFIG", parse(from_os_str))]
    config: PathBuf,

    /// Override the output directory recorded in the configuration.
    #[clap(short, long, parse(from_os_str))]
    output_dir: Option<PathBuf>,
}

pub fn main() {
    if let Err(err) = try_main() {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

pub fn try_main() -> Result<()> {
    let _ = env_logger::Builder::from_env("IFEM_LOG").try_init();

    let opt = Opt::parse();
    let mut params = load_parameters(&opt.config)?;
    if let Some(output_dir) = opt.output_dir {
        params.output_dir = output_dir;
    }

    let mut driver = FsiDriver::new(&params, Rc::new(LocalComm::new()))?;
    driver.run()?;
    Ok(())
}
