mod parser;
#[allow(non_camel_case_types)]
mod types;

pub(crate) use parser::ElfParser;
