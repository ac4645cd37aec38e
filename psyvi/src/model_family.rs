use crate::error::ConfigurationError;

/// Model families, resolved once at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Irt1PL,
    Irt2PL,
    Irt3PL,
    Irt4PL,
    Dina,
    Dino,
    /// higher-order DINA; built through its own façade only
    HoDina,
}

impl ModelFamily {
    pub fn name(&self) -> &'static str {
        match self {
            ModelFamily::Irt1PL => "irt_1pl",
            ModelFamily::Irt2PL => "irt_2pl",
            ModelFamily::Irt3PL => "irt_3pl",
            ModelFamily::Irt4PL => "irt_4pl",
            ModelFamily::Dina => "dina",
            ModelFamily::Dino => "dino",
            ModelFamily::HoDina => "ho_dina",
        }
    }

    pub fn is_irt(&self) -> bool {
        matches!(
            self,
            ModelFamily::Irt1PL | ModelFamily::Irt2PL | ModelFamily::Irt3PL | ModelFamily::Irt4PL
        )
    }

    pub fn has_discrimination(&self) -> bool {
        matches!(
            self,
            ModelFamily::Irt2PL | ModelFamily::Irt3PL | ModelFamily::Irt4PL
        )
    }

    pub fn has_guessing(&self) -> bool {
        matches!(self, ModelFamily::Irt3PL | ModelFamily::Irt4PL)
    }

    pub fn has_slipping(&self) -> bool {
        matches!(self, ModelFamily::Irt4PL)
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ModelFamily {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "irt_1pl" => Ok(Self::Irt1PL),
            "irt_2pl" => Ok(Self::Irt2PL),
            "irt_3pl" => Ok(Self::Irt3PL),
            "irt_4pl" => Ok(Self::Irt4PL),
            "dina" => Ok(Self::Dina),
            "dino" => Ok(Self::Dino),
            _ => Err(ConfigurationError::UnknownModel(s.to_string())),
        }
    }
}
