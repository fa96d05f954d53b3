//! Model construction by name and data-type compatibility.

use pairdist_core::{PairdistError, Result};
use pairdist_seq::DataType;

use crate::models::{NucleotideKind, NucleotideModel};
use crate::protein_models::{ProteinKind, ProteinModel};
use crate::subst_model::SubstitutionModel;

/// Model names that cannot be used with nucleotide data.
pub const DNA_INCOMPATIBLE: [&str; 5] = ["JTT92", "JCprot", "DSO78", "WAG01", "LG08"];

/// Model names that cannot be used with protein data.
pub const PROTEIN_INCOMPATIBLE: [&str; 8] =
    ["JCnuc", "JC69", "K80", "HKY85", "TN93", "GTR", "T92", "F84"];

/// Every name [`create_model`] accepts.
pub fn model_names() -> Vec<&'static str> {
    PROTEIN_INCOMPATIBLE
        .iter()
        .chain(DNA_INCOMPATIBLE.iter())
        .copied()
        .collect()
}

/// Build a substitution model from its name.
///
/// # Examples
///
/// ```
/// use pairdist_phylo::factory::create_model;
///
/// let m = create_model("HKY85").unwrap();
/// assert_eq!(m.n_states(), 4);
/// assert!(create_model("nonsense").is_err());
/// ```
pub fn create_model(name: &str) -> Result<Box<dyn SubstitutionModel>> {
    let nucleotide = |kind| -> Box<dyn SubstitutionModel> { Box::new(NucleotideModel::new(kind)) };
    let protein = |kind| -> Box<dyn SubstitutionModel> { Box::new(ProteinModel::new(kind)) };
    let model = match name {
        "JC69" | "JCnuc" => nucleotide(NucleotideKind::Jc69),
        "K80" => nucleotide(NucleotideKind::K80),
        "HKY85" => nucleotide(NucleotideKind::Hky85),
        "TN93" => nucleotide(NucleotideKind::Tn93),
        "T92" => nucleotide(NucleotideKind::T92),
        "F84" => nucleotide(NucleotideKind::F84),
        "GTR" => nucleotide(NucleotideKind::Gtr),
        "JCprot" => protein(ProteinKind::JcProt),
        "JTT92" => protein(ProteinKind::Jtt92),
        "DSO78" => protein(ProteinKind::Dso78),
        "WAG01" => protein(ProteinKind::Wag01),
        "LG08" => protein(ProteinKind::Lg08),
        other => {
            return Err(PairdistError::Config(format!(
                "unknown substitution model '{}' (expected one of {})",
                other,
                model_names().join(", ")
            )))
        }
    };
    Ok(model)
}

/// Reject model names listed as incompatible with `datatype`.
pub fn check_compatible(datatype: DataType, name: &str) -> Result<()> {
    let banned: &[&str] = match datatype {
        DataType::Dna => &DNA_INCOMPATIBLE,
        DataType::Protein => &PROTEIN_INCOMPATIBLE,
    };
    if banned.contains(&name) {
        return Err(PairdistError::Config(format!(
            "model {} is incompatible with {} data",
            name,
            datatype.name()
        )));
    }
    Ok(())
}

/// Whether the model works on 20-state data.
pub fn is_protein_model(model: &dyn SubstitutionModel) -> bool {
    model.n_states() == DataType::Protein.n_states()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_builds() {
        for name in model_names() {
            let m = create_model(name).unwrap();
            let expected = if DNA_INCOMPATIBLE.contains(&name) { 20 } else { 4 };
            assert_eq!(m.n_states(), expected, "{}", name);
        }
    }

    #[test]
    fn unknown_model_is_config_error() {
        assert!(matches!(create_model("LG"), Err(PairdistError::Config(_))));
    }

    #[test]
    fn compatibility_lists() {
        assert!(check_compatible(DataType::Dna, "GTR").is_ok());
        assert!(check_compatible(DataType::Dna, "LG08").is_err());
        assert!(check_compatible(DataType::Protein, "WAG01").is_ok());
        assert!(check_compatible(DataType::Protein, "JCnuc").is_err());
        assert!(matches!(
            check_compatible(DataType::Protein, "HKY85"),
            Err(PairdistError::Config(_))
        ));
    }

    #[test]
    fn jcnuc_aliases_jc69() {
        let a = create_model("JCnuc").unwrap().transition_probs(0.2);
        let b = create_model("JC69").unwrap().transition_probs(0.2);
        assert_eq!(a, b);
        assert!(is_protein_model(create_model("DSO78").unwrap().as_ref()));
    }
}
