//! Layered runtime configuration: defaults, optional file, env overrides.

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::model::{self, GlobalModel, ParameterSet};

#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub quorum_threshold: usize,
    pub seed_model_path: Option<String>,
}

/// Builds the coordinator config from defaults, then an optional file named
/// by `FED_CONFIG_FILE`, then environment overrides of the form
/// `FED__QUORUM_THRESHOLD` (keys separated by `__`).
pub fn load_config() -> Result<CoordinatorConfig> {
    let mut builder = config::Config::builder().set_default("quorum_threshold", 2i64)?;
    if let Ok(file) = std::env::var("FED_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(
        config::Environment::with_prefix("FED")
            .separator("__")
            .try_parsing(true),
    );
    let cfg: CoordinatorConfig = builder.build()?.try_deserialize()?;
    ensure!(cfg.quorum_threshold >= 1, "quorum_threshold must be at least 1");
    Ok(cfg)
}

/// Reads a JSON parameter set for the initial global model. Without a path
/// the model starts empty and the first round's clients define the schema.
pub fn load_seed_model(path: Option<&str>) -> Result<GlobalModel> {
    let parameters = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p).with_context(|| format!("reading seed model {p}"))?;
            let parameters: ParameterSet =
                serde_json::from_str(&text).with_context(|| format!("parsing seed model {p}"))?;
            model::validate_parameters(&parameters)?;
            parameters
        }
        None => ParameterSet::new(),
    };
    Ok(GlobalModel::seed(parameters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tensor;
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;

    // env vars are process-global; serialize the tests that touch them
    static ENV_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[test]
    fn defaults_give_minimum_viable_quorum() {
        let _guard = ENV_GUARD.lock();
        std::env::remove_var("FED__QUORUM_THRESHOLD");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.quorum_threshold, 2);
        assert!(cfg.seed_model_path.is_none());
    }

    #[test]
    fn env_overrides_quorum() {
        let _guard = ENV_GUARD.lock();
        std::env::set_var("FED__QUORUM_THRESHOLD", "5");
        let cfg = load_config().unwrap();
        std::env::remove_var("FED__QUORUM_THRESHOLD");
        assert_eq!(cfg.quorum_threshold, 5);
    }

    #[test]
    fn zero_quorum_rejected() {
        let _guard = ENV_GUARD.lock();
        std::env::set_var("FED__QUORUM_THRESHOLD", "0");
        let res = load_config();
        std::env::remove_var("FED__QUORUM_THRESHOLD");
        assert!(res.is_err());
    }

    #[test]
    fn seed_model_loads_from_json() {
        let mut params = ParameterSet::new();
        params.insert("w".into(), Tensor::vector(vec![0.5, 1.5]));
        let path = std::env::temp_dir().join(format!("seed-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, serde_json::to_vec(&params).unwrap()).unwrap();

        let model = load_seed_model(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(model.version, 1);
        assert_eq!(model.round_id, 0);
        assert_eq!(model.parameters["w"].values, vec![0.5, 1.5]);
    }

    #[test]
    fn absent_seed_path_starts_empty() {
        let model = load_seed_model(None).unwrap();
        assert!(model.parameters.is_empty());
    }
}
