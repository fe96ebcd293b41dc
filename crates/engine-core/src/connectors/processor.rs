use model::{error::ConnectError, records::message::Document};
use std::sync::Arc;

/// Field-level transform applied to every record of a connector.
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `None` to drop the record from the rest of the pipeline.
    fn apply(&self, connector: &str, document: Document) -> Result<Option<Document>, ConnectError>;
}

#[derive(Clone, Default)]
pub struct ProcessorPipeline {
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn apply(
        &self,
        connector: &str,
        document: Document,
    ) -> Result<Option<Document>, ConnectError> {
        let mut current = document;
        for processor in &self.processors {
            match processor.apply(connector, current)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    struct Rename;

    impl Processor for Rename {
        fn name(&self) -> &str {
            "rename"
        }

        fn apply(&self, _: &str, mut document: Document) -> Result<Option<Document>, ConnectError> {
            if let Some(map) = document.value.as_object_mut()
                && let Some(v) = map.remove("id")
            {
                map.insert("order_id".into(), v);
            }
            Ok(Some(document))
        }
    }

    struct DropAll;

    impl Processor for DropAll {
        fn name(&self) -> &str {
            "drop"
        }

        fn apply(&self, _: &str, _: Document) -> Result<Option<Document>, ConnectError> {
            Ok(None)
        }
    }

    #[test]
    fn processors_run_in_order_and_can_drop() {
        let doc = Document::new(Value::Null, json!({"id": 7}));

        let renamed = ProcessorPipeline::new()
            .add_processor(Arc::new(Rename))
            .apply("orders", doc.clone())
            .unwrap()
            .unwrap();
        assert_eq!(renamed.value, json!({"order_id": 7}));

        let dropped = ProcessorPipeline::new()
            .add_processor(Arc::new(DropAll))
            .add_processor(Arc::new(Rename))
            .apply("orders", doc)
            .unwrap();
        assert!(dropped.is_none());
    }
}
