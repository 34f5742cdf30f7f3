//! Model bundle I/O.
//!
//! A model directory holds the acoustic model, the decode graph, the word
//! symbol table and the optional normalization/transform artifacts the
//! configuration points at. Everything loaded here is immutable; a single
//! [`ModelBundle`] is intended to be wrapped in an `Arc` and shared across
//! decode sessions that use the same model.

use crate::am::{AcousticModel, AcousticModelData};
use crate::config::DecoderConfig;
use crate::error::{LattixError, Result};
use crate::graph::DecodeGraph;
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Global cepstral mean/variance statistics for CMVN priors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmvnStats {
    pub mean: Vec<f32>,
    pub var: Vec<f32>,
    pub count: f32,
}

/// I-vector extractor: a projection from the mean base feature to the
/// embedding space.
#[derive(Debug)]
pub struct IvectorExtractor {
    pub projection: Array2<f32>,
}

impl IvectorExtractor {
    pub fn dim(&self) -> usize {
        self.projection.nrows()
    }
}

/// Word position classes for boundary-aware alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordPosition {
    Begin,
    End,
    Internal,
    Singleton,
    Silence,
}

/// Phone-to-word-position table used to re-align lattice word spans on
/// phone boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordBoundaryTable {
    positions: BTreeMap<i32, WordPosition>,
}

impl WordBoundaryTable {
    pub fn position(&self, phone: i32) -> Option<WordPosition> {
        self.positions.get(&phone).copied()
    }

    /// True when the phone starts a new word.
    pub fn starts_word(&self, phone: i32) -> bool {
        matches!(
            self.position(phone),
            Some(WordPosition::Begin) | Some(WordPosition::Singleton)
        )
    }

    pub fn is_silence(&self, phone: i32) -> bool {
        self.position(phone) == Some(WordPosition::Silence)
    }
}

/// Word id <-> text mapping. Text format, one `word id` pair per line,
/// the way symbol tables are conventionally shipped.
#[derive(Debug)]
pub struct SymbolTable {
    words: BTreeMap<u32, String>,
}

impl SymbolTable {
    pub fn read_text(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut words = BTreeMap::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let word = parts.next();
            let id = parts.next().and_then(|s| s.parse::<u32>().ok());
            match (word, id) {
                (Some(word), Some(id)) => {
                    words.insert(id, word.to_string());
                }
                _ => {
                    return Err(LattixError::ModelLoad {
                        path: path.display().to_string(),
                        message: format!("malformed symbol table line {}", line_no + 1),
                    });
                }
            }
        }
        Ok(Self { words })
    }

    /// Word text for an id. Unknown and epsilon ids map to the empty
    /// string rather than an error: lattice traversal legitimately
    /// references them.
    pub fn word_text(&self, id: u32) -> &str {
        self.words.get(&id).map_or("", |s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Keyed per-speaker transform matrices.
#[derive(Debug)]
pub struct SpeakerRegistry {
    matrices: BTreeMap<String, Array2<f32>>,
}

impl SpeakerRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: BTreeMap<String, Vec<Vec<f32>>> = load_json(path)?;
        let mut matrices = BTreeMap::new();
        for (key, rows) in raw {
            matrices.insert(key.clone(), matrix_from_rows(path, &rows)?);
        }
        Ok(Self { matrices })
    }

    pub fn lookup(&self, key: &str) -> Result<&Array2<f32>> {
        self.matrices
            .get(key)
            .ok_or_else(|| LattixError::UnknownSpeaker {
                key: key.to_string(),
            })
    }

    pub fn list_keys(&self) -> Vec<String> {
        self.matrices.keys().cloned().collect()
    }
}

/// Everything loaded from a model directory, shared read-only across
/// sessions.
#[derive(Debug)]
pub struct ModelBundle {
    pub acoustic_model: Arc<AcousticModel>,
    pub graph: Arc<DecodeGraph>,
    pub words: SymbolTable,
    pub word_boundary: Option<WordBoundaryTable>,
    pub cmvn_stats: Option<CmvnStats>,
    pub lda: Option<Array2<f32>>,
    pub ivector: Option<IvectorExtractor>,
}

impl ModelBundle {
    /// Load all artifacts the configuration names. Any failure aborts the
    /// whole load; a partially loaded bundle is never returned.
    pub fn load(config: &DecoderConfig) -> Result<Self> {
        let am_data: AcousticModelData = load_json(&config.resolve(&config.paths.acoustic_model))?;
        let acoustic_model = Arc::new(AcousticModel::from_data(am_data)?);

        let graph = Arc::new(DecodeGraph::load(&config.resolve(&config.paths.graph))?);
        let words = SymbolTable::read_text(&config.resolve(&config.paths.words))?;

        let word_boundary = match &config.paths.word_boundary {
            Some(path) => Some(load_json(&config.resolve(path))?),
            None => None,
        };

        let cmvn_stats = match (&config.paths.cmvn_stats, config.cmvn.enabled) {
            (Some(path), true) => Some(load_json(&config.resolve(path))?),
            _ => None,
        };

        let lda = match (&config.paths.lda_matrix, config.transform.use_lda) {
            (Some(path), true) => {
                let path = config.resolve(path);
                let rows: Vec<Vec<f32>> = load_json(&path)?;
                Some(matrix_from_rows(&path, &rows)?)
            }
            _ => None,
        };

        let ivector = match (&config.paths.ivector_extractor, config.ivector.enabled) {
            (Some(path), true) => {
                let path = config.resolve(path);
                let rows: Vec<Vec<f32>> = load_json(&path)?;
                Some(IvectorExtractor {
                    projection: matrix_from_rows(&path, &rows)?,
                })
            }
            _ => None,
        };

        log::info!(
            "model bundle loaded: {} pdfs, {} graph states, {} words",
            acoustic_model.num_pdfs(),
            graph.num_states(),
            words.len()
        );

        Ok(Self {
            acoustic_model,
            graph,
            words,
            word_boundary,
            cmvn_stats,
            lda,
            ivector,
        })
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(LattixError::ModelFileNotFound {
            path: path.display().to_string(),
        });
    }
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| LattixError::ModelLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn matrix_from_rows(path: &Path, rows: &[Vec<f32>]) -> Result<Array2<f32>> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, |r| r.len());
    if nrows == 0 || ncols == 0 || rows.iter().any(|r| r.len() != ncols) {
        return Err(LattixError::ModelLoad {
            path: path.display().to_string(),
            message: "matrix rows are empty or ragged".to_string(),
        });
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((nrows, ncols), flat).map_err(|e| LattixError::ModelLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_symbol_table_reads_text_format() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"<eps> 0\nhello 1\nworld 2\n").unwrap();
        let table = SymbolTable::read_text(file.path()).unwrap();
        assert_eq!(table.word_text(1), "hello");
        assert_eq!(table.word_text(2), "world");
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_symbol_table_unknown_id_is_empty_string() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello 1\n").unwrap();
        let table = SymbolTable::read_text(file.path()).unwrap();
        assert_eq!(table.word_text(999), "");
    }

    #[test]
    fn test_symbol_table_malformed_line_errors() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello\n").unwrap();
        assert!(SymbolTable::read_text(file.path()).is_err());
    }

    #[test]
    fn test_speaker_registry_lookup_and_keys() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"alice": [[1.0, 0.0], [0.0, 1.0]], "bob": [[2.0, 0.0], [0.0, 2.0]]}"#)
            .unwrap();
        let registry = SpeakerRegistry::load(file.path()).unwrap();
        assert_eq!(registry.list_keys(), vec!["alice", "bob"]);
        assert_eq!(registry.lookup("bob").unwrap()[(0, 0)], 2.0);
        assert!(matches!(
            registry.lookup("carol"),
            Err(LattixError::UnknownSpeaker { .. })
        ));
    }

    #[test]
    fn test_word_boundary_positions() {
        let json = r#"{"positions": {"1": "silence", "2": "begin", "3": "end", "4": "singleton"}}"#;
        let table: WordBoundaryTable = serde_json::from_str(json).unwrap();
        assert!(table.is_silence(1));
        assert!(table.starts_word(2));
        assert!(table.starts_word(4));
        assert!(!table.starts_word(3));
        assert_eq!(table.position(9), None);
    }

    #[test]
    fn test_ragged_matrix_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"spk": [[1.0, 2.0], [3.0]]}"#).unwrap();
        assert!(SpeakerRegistry::load(file.path()).is_err());
    }

    #[test]
    fn test_bundle_load_missing_artifact_aborts() {
        let dir = TempDir::new().unwrap();
        let config = DecoderConfig {
            model_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let err = ModelBundle::load(&config).unwrap_err();
        assert!(matches!(err, LattixError::ModelFileNotFound { .. }));
    }
}
