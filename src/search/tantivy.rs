//! In-memory full-text index over the local catalog.
//!
//! One document per package, keyed by name. Field weights: name 10,
//! keywords 7, author 6, description 4, version unweighted. Tokens are split
//! on non-alphanumerics and lowercased, nothing else; package names and
//! versions are not natural-language words so no stemming is applied.

use std::sync::Arc;

use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::{AllQuery, BooleanQuery, BoostQuery, Occur, Query, QueryParser, RegexQuery};
use tantivy::schema::*;
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, TantivyError, doc};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{CatalogEvent, PackageManifest};
use crate::storage::{LocalStore, StoreError};

/// Tokenizer registered for every weighted text field.
pub const PACKAGE_TOKENIZER: &str = "package";
/// Query text that lists the whole catalog.
pub const WILDCARD: &str = "*";
/// Author recorded when a package names none.
pub const UNKNOWN_AUTHOR: &str = "???";

const WRITER_HEAP_BYTES: usize = 50_000_000;

const NAME_BOOST: f32 = 10.0;
const KEYWORDS_BOOST: f32 = 7.0;
const AUTHOR_BOOST: f32 = 6.0;
const DESCRIPTION_BOOST: f32 = 4.0;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("failed to load local catalog: {0}")]
    Catalog(#[from] StoreError),

    #[error("index error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("invalid index query: {0}")]
    Query(String),
}

#[derive(Clone, Copy)]
pub struct Fields {
    pub id: Field,
    pub name: Field,
    pub description: Field,
    pub version: Field,
    pub keywords: Field,
    pub author: Field,
    pub readme: Field,
}

/// Projection of a package stored in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    pub id: String,
    pub name: String,
    pub description: String,
    /// `v<version>`, so versions stay a single token.
    pub version: String,
    pub keywords: String,
    pub author: String,
    pub readme: String,
}

impl IndexDocument {
    /// Project the package's current version.
    pub fn from_manifest(manifest: &PackageManifest) -> Self {
        let current = manifest.current();
        let author = current
            .and_then(|v| v.npm_user.as_ref().map(|u| u.name.clone()))
            .or_else(|| {
                current
                    .and_then(|v| v.author.as_ref())
                    .or(manifest.author.as_ref())
                    .and_then(|a| a.name().map(str::to_string))
            })
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

        Self {
            id: manifest.name.clone(),
            name: manifest.name.clone(),
            description: current
                .and_then(|v| v.description.clone())
                .or_else(|| manifest.description.clone())
                .unwrap_or_default(),
            version: current
                .map(|v| format!("v{}", v.version))
                .unwrap_or_default(),
            keywords: current.map(|v| v.keywords.join(" ")).unwrap_or_default(),
            author,
            readme: manifest.readme.clone().unwrap_or_default(),
        }
    }
}

/// A ranked index match.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub ref_name: String,
    pub score: f32,
}

pub struct LocalIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
    store: Arc<dyn LocalStore>,
}

impl LocalIndex {
    /// Create an empty index over `store`. Call [`LocalIndex::reindex`] to fill it.
    pub fn new(store: Arc<dyn LocalStore>) -> Result<Self, IndexError> {
        let schema = build_schema();
        let index = Index::create_in_ram(schema.clone());
        index.tokenizers().register(
            PACKAGE_TOKENIZER,
            TextAnalyzer::builder(SimpleTokenizer::default())
                .filter(LowerCaser)
                .build(),
        );
        let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let fields = fields_from_schema(&schema)?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
            store,
        })
    }

    /// Upsert the package's document.
    pub fn add(&self, manifest: &PackageManifest) -> Result<(), IndexError> {
        let document = IndexDocument::from_manifest(manifest);
        self.commit_or_rollback(|writer| {
            writer.delete_term(self.id_term(&document.id));
            writer.add_document(self.to_tantivy(&document))?;
            Ok(())
        })?;
        debug!(package = %document.id, "index_add");
        Ok(())
    }

    /// Delete the package's document; absent names are ignored.
    pub fn remove(&self, name: &str) -> Result<(), IndexError> {
        self.commit_or_rollback(|writer| {
            writer.delete_term(self.id_term(name));
            Ok(())
        })?;
        debug!(package = %name, "index_remove");
        Ok(())
    }

    /// Rebuild from the full catalog.
    ///
    /// Any failure leaves the index as it was and is returned.
    pub async fn reindex(&self) -> Result<usize, IndexError> {
        let catalog = self.store.list_all().await?;
        self.commit_or_rollback(|writer| {
            writer.delete_all_documents()?;
            for manifest in &catalog {
                let document = IndexDocument::from_manifest(manifest);
                writer.delete_term(self.id_term(&document.id));
                writer.add_document(self.to_tantivy(&document))?;
            }
            Ok(())
        })?;
        info!(packages = catalog.len(), "index_rebuilt");
        Ok(catalog.len())
    }

    /// Commit what `stage` queues, or discard all of it if any step fails.
    /// Staged operations would otherwise ride along with the next commit.
    fn commit_or_rollback<F>(&self, stage: F) -> Result<(), IndexError>
    where
        F: FnOnce(&mut IndexWriter) -> Result<(), IndexError>,
    {
        {
            let mut writer = self.writer.lock();
            let staged = stage(&mut *writer)
                .and_then(|()| writer.commit().map(drop).map_err(IndexError::from));
            if let Err(e) = staged {
                writer.rollback()?;
                return Err(e);
            }
        }
        self.reader.reload()?;
        Ok(())
    }

    /// Follow a change to the local catalog.
    pub fn apply(&self, event: &CatalogEvent) -> Result<(), IndexError> {
        match event {
            CatalogEvent::Published(manifest) | CatalogEvent::Updated(manifest) => {
                self.add(manifest)
            }
            CatalogEvent::Unpublished(name) => self.remove(name),
        }
    }

    /// Ranked matches for `text`, best first.
    ///
    /// `*` lists every indexed package with score 1.
    pub fn query(&self, text: &str) -> Result<Vec<IndexHit>, IndexError> {
        let searcher = self.reader.searcher();
        let limit = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX).max(1);

        if is_wildcard(text) {
            let top_docs = searcher.search(&AllQuery, &TopDocs::with_limit(limit).order_by_score())?;
            let mut hits = Vec::with_capacity(top_docs.len());
            for (_, addr) in top_docs {
                let doc: TantivyDocument = searcher.doc(addr)?;
                if let Some(name) = self.stored_id(&doc) {
                    hits.push(IndexHit {
                        ref_name: name,
                        score: 1.0,
                    });
                }
            }
            hits.sort_by(|a, b| a.ref_name.cmp(&b.ref_name));
            return Ok(hits);
        }

        let query = self.build_query(text)?;
        let top_docs = searcher.search(query.as_ref(), &TopDocs::with_limit(limit).order_by_score())?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr)?;
            if let Some(name) = self.stored_id(&doc) {
                hits.push(IndexHit {
                    ref_name: name,
                    score,
                });
            }
        }
        debug!(query = %text, hits = hits.len(), "index_query");
        Ok(hits)
    }

    pub fn len(&self) -> usize {
        usize::try_from(self.reader.searcher().num_docs()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Weighted term query plus infix matches on the name, so `pad` finds
    /// `left-pad` and `lodash` finds `lodash.merge`.
    fn build_query(&self, text: &str) -> Result<Box<dyn Query>, IndexError> {
        let f = self.fields;
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![f.name, f.keywords, f.author, f.description, f.version],
        );
        parser.set_field_boost(f.name, NAME_BOOST);
        parser.set_field_boost(f.keywords, KEYWORDS_BOOST);
        parser.set_field_boost(f.author, AUTHOR_BOOST);
        parser.set_field_boost(f.description, DESCRIPTION_BOOST);
        let (parsed, errors) = parser.parse_query_lenient(text);
        if !errors.is_empty() {
            debug!(query = %text, errors = errors.len(), "index_query_lenient");
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Should, parsed)];
        for token in infix_tokens(text) {
            let pattern = format!(".*{}.*", regex::escape(&token));
            let infix = RegexQuery::from_pattern(&pattern, f.name)
                .map_err(|e| IndexError::Query(e.to_string()))?;
            clauses.push((
                Occur::Should,
                Box::new(BoostQuery::new(Box::new(infix), NAME_BOOST)),
            ));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn id_term(&self, id: &str) -> Term {
        Term::from_field_text(self.fields.id, id)
    }

    fn stored_id(&self, doc: &TantivyDocument) -> Option<String> {
        doc.get_first(self.fields.id)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    fn to_tantivy(&self, d: &IndexDocument) -> TantivyDocument {
        let f = self.fields;
        doc! {
            f.id => d.id.clone(),
            f.name => d.name.clone(),
            f.description => d.description.clone(),
            f.version => d.version.clone(),
            f.keywords => d.keywords.clone(),
            f.author => d.author.clone(),
            f.readme => d.readme.clone(),
        }
    }
}

/// Only the bare `*` lists the catalog; padded or repeated stars are queries.
fn is_wildcard(text: &str) -> bool {
    text == WILDCARD
}

/// Lowercased alphanumeric runs of `text`, the same split the tokenizer makes.
fn infix_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn build_schema() -> Schema {
    let weighted = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(PACKAGE_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let mut schema_builder = Schema::builder();
    schema_builder.add_text_field("id", STRING | STORED);
    schema_builder.add_text_field("name", weighted.clone());
    schema_builder.add_text_field("description", weighted.clone());
    schema_builder.add_text_field("version", STRING);
    schema_builder.add_text_field("keywords", weighted.clone());
    schema_builder.add_text_field("author", weighted);
    schema_builder.add_text_field("readme", STORED);
    schema_builder.build()
}

pub fn fields_from_schema(schema: &Schema) -> Result<Fields, IndexError> {
    Ok(Fields {
        id: schema.get_field("id")?,
        name: schema.get_field("name")?,
        description: schema.get_field("description")?,
        version: schema.get_field("version")?,
        keywords: schema.get_field("keywords")?,
        author: schema.get_field("author")?,
        readme: schema.get_field("readme")?,
    })
}
