pub mod fit;
pub mod simulate;

use clap::ValueEnum;

/// Command-line model selector; `ho_dina` has no library string
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "snake_case")]
pub enum ModelArg {
    #[value(name = "irt_1pl")]
    Irt1pl,
    #[value(name = "irt_2pl")]
    Irt2pl,
    #[value(name = "irt_3pl")]
    Irt3pl,
    #[value(name = "irt_4pl")]
    Irt4pl,
    Dina,
    Dino,
    HoDina,
}

impl ModelArg {
    pub fn name(&self) -> &'static str {
        match self {
            ModelArg::Irt1pl => "irt_1pl",
            ModelArg::Irt2pl => "irt_2pl",
            ModelArg::Irt3pl => "irt_3pl",
            ModelArg::Irt4pl => "irt_4pl",
            ModelArg::Dina => "dina",
            ModelArg::Dino => "dino",
            ModelArg::HoDina => "ho_dina",
        }
    }

    pub fn is_irt(&self) -> bool {
        matches!(
            self,
            ModelArg::Irt1pl | ModelArg::Irt2pl | ModelArg::Irt3pl | ModelArg::Irt4pl
        )
    }
}

fn init_logger(verbose: bool) {
    if verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = env_logger::try_init();
}
