fn main() -> Result<(), Box<dyn std::error::Error>> {
    bulkgen_codegen::Builder::new().deny_errors(true).run()?;
    Ok(())
}
