use miette::Result;

pub fn run() -> Result<()> {
    println!("kiln {}", kiln_core::VERSION);
    Ok(())
}
