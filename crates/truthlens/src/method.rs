//! Model/encoding combinations a prediction can be dispatched with.
//!
//! The wire form is `<encoding>_<classifier>` (e.g. `dlib_rf`). Only the
//! combinations listed in [`MethodId::ALL`] are accepted; anything else is a
//! request validation error raised before dispatch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::request::RequestError;

/// Feature-extraction method run on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingKind {
    Hog,
    Dlib,
    Resnet,
}

impl EncodingKind {
    pub const ALL: [EncodingKind; 3] = [Self::Dlib, Self::Hog, Self::Resnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hog => "hog",
            Self::Dlib => "dlib",
            Self::Resnet => "resnet",
        }
    }

    /// Length of the feature vector this encoding produces.
    pub fn feature_count(&self) -> u32 {
        match self {
            Self::Dlib => 68,
            Self::Hog => 324,
            Self::Resnet => 512,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Hog => "HOG",
            Self::Dlib => "dlib Landmarks",
            Self::Resnet => "ResNet18",
        }
    }
}

impl fmt::Display for EncodingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier applied to the extracted features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassifierKind {
    RandomForest,
    DecisionTree,
    LogisticRegression,
}

impl ClassifierKind {
    /// Short code used in method ids.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RandomForest => "rf",
            Self::DecisionTree => "dt",
            Self::LogisticRegression => "lr",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RandomForest => "RandomForest",
            Self::DecisionTree => "DecisionTree",
            Self::LogisticRegression => "LogisticRegression",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::RandomForest => "Random Forest",
            Self::DecisionTree => "Decision Tree",
            Self::LogisticRegression => "Logistic Regression",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "rf" => Some(Self::RandomForest),
            "dt" => Some(Self::DecisionTree),
            "lr" => Some(Self::LogisticRegression),
            _ => None,
        }
    }
}

/// An (encoding, classifier) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId {
    pub encoding: EncodingKind,
    pub classifier: ClassifierKind,
}

impl MethodId {
    /// Every combination the remote side has trained models for.
    pub const ALL: [MethodId; 7] = [
        MethodId::new(EncodingKind::Hog, ClassifierKind::RandomForest),
        MethodId::new(EncodingKind::Hog, ClassifierKind::DecisionTree),
        MethodId::new(EncodingKind::Dlib, ClassifierKind::RandomForest),
        MethodId::new(EncodingKind::Dlib, ClassifierKind::DecisionTree),
        MethodId::new(EncodingKind::Resnet, ClassifierKind::RandomForest),
        MethodId::new(EncodingKind::Resnet, ClassifierKind::DecisionTree),
        MethodId::new(EncodingKind::Resnet, ClassifierKind::LogisticRegression),
    ];

    pub const DEFAULT: MethodId = MethodId::new(EncodingKind::Dlib, ClassifierKind::RandomForest);

    pub const fn new(encoding: EncodingKind, classifier: ClassifierKind) -> Self {
        Self {
            encoding,
            classifier,
        }
    }

    pub fn is_supported(&self) -> bool {
        Self::ALL.contains(self)
    }

    /// Short display form, e.g. `DLIB + RF`.
    pub fn model_combination(&self) -> String {
        format!(
            "{} + {}",
            self.encoding.as_str().to_uppercase(),
            self.classifier.code().to_uppercase()
        )
    }

    /// Human-readable label, e.g. `dlib Landmarks + Random Forest`.
    pub fn label(&self) -> String {
        format!("{} + {}", self.encoding.label(), self.classifier.label())
    }
}

impl Default for MethodId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.encoding, self.classifier.code())
    }
}

impl FromStr for MethodId {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RequestError::UnknownMethod(s.to_string());
        let (encoding, classifier) = s.trim().rsplit_once('_').ok_or_else(invalid)?;
        let encoding = match encoding.to_ascii_lowercase().as_str() {
            "hog" => EncodingKind::Hog,
            "dlib" => EncodingKind::Dlib,
            "resnet" => EncodingKind::Resnet,
            _ => return Err(invalid()),
        };
        let classifier =
            ClassifierKind::from_code(&classifier.to_ascii_lowercase()).ok_or_else(invalid)?;
        let method = MethodId::new(encoding, classifier);
        if !method.is_supported() {
            return Err(invalid());
        }
        Ok(method)
    }
}

impl Serialize for MethodId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MethodId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Non-empty, duplicate-free, ordered list of methods for one aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSet(Vec<MethodId>);

impl MethodSet {
    /// Build from already-parsed ids. Empty input yields the default method;
    /// repeated ids keep their first position.
    pub fn new(methods: impl IntoIterator<Item = MethodId>) -> Self {
        let mut unique: Vec<MethodId> = Vec::new();
        for method in methods {
            if !unique.contains(&method) {
                unique.push(method);
            }
        }
        if unique.is_empty() {
            unique.push(MethodId::DEFAULT);
        }
        Self(unique)
    }

    /// Parse wire ids, rejecting the whole set on the first unknown id.
    pub fn parse<S: AsRef<str>>(ids: &[S]) -> Result<Self, RequestError> {
        let methods = ids
            .iter()
            .map(|id| id.as_ref().parse::<MethodId>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(methods))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodId> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[MethodId] {
        &self.0
    }
}

impl Default for MethodSet {
    fn default() -> Self {
        Self(vec![MethodId::DEFAULT])
    }
}

/// Catalogue entry describing one supported method.
#[derive(Debug, Clone, Serialize)]
pub struct MethodDescriptor {
    pub value: MethodId,
    pub label: String,
    pub features: u32,
}

pub fn available_methods() -> Vec<MethodDescriptor> {
    MethodId::ALL
        .iter()
        .map(|m| MethodDescriptor {
            value: *m,
            label: m.label(),
            features: m.encoding.feature_count(),
        })
        .collect()
}
