use std::{
    env,
    fs::File,
    io::{self, prelude::*},
    path::PathBuf,
};

fn main() -> Result<(), Error> {
    // Host builds (tests, docs) run without a device and need no linker script.
    if let Some(target) = Target::read() {
        copy_memory_config(target)?;
    }

    println!("cargo:rerun-if-changed=build.rs");

    Ok(())
}

/// Make `memory.x` available to dependent crates
fn copy_memory_config(target: Target) -> Result<(), Error> {
    let memory_x = match target.sub_family {
        SubFamily::Apm32f405 | SubFamily::Apm32f407 => include_bytes!("memory_1024_128.x").as_ref(),
    };

    let out_dir = env::var("OUT_DIR")?;
    let out_dir = PathBuf::from(out_dir);

    File::create(out_dir.join("memory.x"))?.write_all(memory_x)?;

    // Tell Cargo where to find the file.
    println!("cargo:rustc-link-search={}", out_dir.display());

    println!("cargo:rerun-if-changed=memory_1024_128.x");

    Ok(())
}

#[derive(Clone, Copy)]
struct Target {
    sub_family: SubFamily,
}

impl Target {
    fn read() -> Option<Self> {
        SubFamily::read().map(|sub_family| Self { sub_family })
    }
}

#[derive(Clone, Copy)]
enum SubFamily {
    Apm32f405,
    Apm32f407,
}

impl SubFamily {
    fn read() -> Option<Self> {
        if cfg!(feature = "apm32f405") {
            Some(SubFamily::Apm32f405)
        } else if cfg!(feature = "apm32f407") {
            Some(SubFamily::Apm32f407)
        } else {
            None
        }
    }
}

#[derive(Debug)]
enum Error {
    Env(env::VarError),
    Io(io::Error),
}

impl From<env::VarError> for Error {
    fn from(error: env::VarError) -> Self {
        Self::Env(error)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}
