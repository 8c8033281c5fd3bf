use std::collections::HashMap;

use once_cell::sync::Lazy;

pub const NAME_FIELD: &str = "name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKind {
    Rating,
    ContestCount,
    SolvedCount,
}

impl StatKind {
    pub fn label(self) -> &'static str {
        match self {
            StatKind::Rating => "rating",
            StatKind::ContestCount => "contest-count",
            StatKind::SolvedCount => "solved-count",
        }
    }
}

/// One row of the platform capability table: which derived statistics a
/// platform exposes, in column order.
#[derive(Debug, Clone, Copy)]
pub struct PlatformSpec {
    pub name: &'static str,
    pub stats: &'static [StatKind],
}

pub const PLATFORMS: &[PlatformSpec] = &[
    PlatformSpec {
        name: "atcoder",
        stats: &[StatKind::Rating, StatKind::ContestCount],
    },
    PlatformSpec {
        name: "codeforces",
        stats: &[
            StatKind::Rating,
            StatKind::ContestCount,
            StatKind::SolvedCount,
        ],
    },
    PlatformSpec {
        name: "nowcoder",
        stats: &[StatKind::Rating, StatKind::ContestCount],
    },
    PlatformSpec {
        name: "leetcode",
        stats: &[StatKind::Rating, StatKind::ContestCount],
    },
    PlatformSpec {
        name: "luogu",
        stats: &[StatKind::SolvedCount],
    },
    PlatformSpec {
        name: "vjudge",
        stats: &[StatKind::SolvedCount],
    },
];

static STANDARD: Lazy<ColumnSchema> = Lazy::new(|| ColumnSchema::from_platforms(PLATFORMS));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    Name,
    Handle { platform: String },
    Stat { platform: String, kind: StatKind },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub title: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedColumn {
    pub kind: StatKind,
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct ColumnSchema {
    columns: Vec<Column>,
    fields: Vec<String>,
    index: HashMap<String, usize>,
    derived: HashMap<String, Vec<DerivedColumn>>,
}

impl ColumnSchema {
    /// The name column followed by, per platform, its handle column and
    /// then its derived statistic columns.
    pub fn from_platforms(platforms: &[PlatformSpec]) -> Self {
        let mut schema = ColumnSchema {
            columns: Vec::new(),
            fields: Vec::new(),
            index: HashMap::new(),
            derived: HashMap::new(),
        };
        schema.push(NAME_FIELD.to_string(), ColumnKind::Name);
        schema.fields.push(NAME_FIELD.to_string());

        for spec in platforms {
            schema.push(
                spec.name.to_string(),
                ColumnKind::Handle {
                    platform: spec.name.to_string(),
                },
            );
            schema.fields.push(spec.name.to_string());

            let mut derived = Vec::with_capacity(spec.stats.len());
            for &kind in spec.stats {
                let column = schema.push(
                    format!("{} {}", spec.name, kind.label()),
                    ColumnKind::Stat {
                        platform: spec.name.to_string(),
                        kind,
                    },
                );
                derived.push(DerivedColumn { kind, column });
            }
            schema.derived.insert(spec.name.to_string(), derived);
        }
        schema
    }

    pub fn standard() -> &'static ColumnSchema {
        &STANDARD
    }

    fn push(&mut self, title: String, kind: ColumnKind) -> usize {
        let idx = self.columns.len();
        self.index.insert(title.clone(), idx);
        self.columns.push(Column { title, kind });
        idx
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.title.as_str())
    }

    pub fn index_of(&self, title: &str) -> Option<usize> {
        self.index.get(title).copied()
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field_column(&self, field: &str) -> Option<usize> {
        let idx = self.index_of(field)?;
        match self.columns[idx].kind {
            ColumnKind::Name | ColumnKind::Handle { .. } => Some(idx),
            ColumnKind::Stat { .. } => None,
        }
    }

    /// Empty for the name field and for platforms without derived columns.
    pub fn derived_columns(&self, platform: &str) -> &[DerivedColumn] {
        self.derived
            .get(platform)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
