//! The middleware pipeline every build output runs through.
//!
//! Middleware run strictly in registration order. A middleware that returns
//! a collection replaces the working copy; one that returns nothing, errors
//! or panics leaves the last good collection in place. The first error stops
//! the series and is handed back together with that collection.

use crate::error::SquareError;
use crate::model::{Collection, Distribution, Package};
use crate::template::Tagger;
use crate::utils::catch_panic;
use log::{debug, warn};
use std::sync::Arc;

/// Everything a middleware may look at while it runs.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub package: &'a Package,
    pub tagger: &'a Tagger,
}

pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Structural identity used to refuse duplicate registrations. Two
    /// middleware with the same fingerprint are considered the same.
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }

    /// Distributions this middleware runs for.
    fn distributions(&self) -> &[Distribution] {
        &Distribution::ALL
    }

    /// Whether this middleware wants to see `collection` at all.
    fn accepts(&self, _collection: &Collection) -> bool {
        true
    }

    /// Returns a replacement collection, or `None` to leave it untouched.
    fn process(
        &self,
        context: &BuildContext<'_>,
        collection: &Collection,
    ) -> Result<Option<Collection>, SquareError>;
}

/// The result of running a collection through the pipeline.
#[derive(Debug)]
pub struct Outcome {
    /// The last good collection.
    pub collection: Collection,
    /// The error that stopped the series, if any.
    pub error: Option<SquareError>,
}

impl Outcome {
    pub fn into_result(self) -> Result<Collection, SquareError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.collection),
        }
    }
}

#[derive(Default)]
pub struct Pipeline {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `middleware` unless one with the same fingerprint is
    /// already present. Returns whether it was added.
    pub fn use_middleware(&mut self, middleware: Box<dyn Middleware>) -> bool {
        self.use_shared(Arc::from(middleware))
    }

    /// Like [`Pipeline::use_middleware`] for middleware shared with another
    /// pipeline.
    pub fn use_shared(&mut self, middleware: Arc<dyn Middleware>) -> bool {
        let fingerprint = middleware.fingerprint();
        if self.middleware.iter().any(|m| m.fingerprint() == fingerprint) {
            warn!("middleware {} is already registered", middleware.name());
            return false;
        }

        debug!("registered middleware {}", middleware.name());
        self.middleware.push(middleware);
        true
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    pub fn clear(&mut self) {
        self.middleware.clear();
    }

    pub fn for_each(&self, context: &BuildContext<'_>, collection: Collection) -> Outcome {
        let mut current = collection;

        for middleware in &self.middleware {
            if !middleware.distributions().contains(&current.distribution)
                || !middleware.accepts(&current)
            {
                continue;
            }

            let name = middleware.name();
            let result = catch_panic(|| middleware.process(context, &current)).unwrap_or_else(
                |message| {
                    Err(SquareError::Middleware {
                        name: name.to_string(),
                        message,
                    })
                },
            );

            match result {
                Ok(Some(next)) => current = next,
                Ok(None) => debug!("{name} left {} untouched", current.extension),
                Err(error) => {
                    warn!("{name} failed on {}: {error}", current.extension);
                    return Outcome {
                        collection: current,
                        error: Some(error),
                    };
                }
            }
        }

        Outcome {
            collection: current,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Replace(&'static str, &'static str);

    impl Middleware for Replace {
        fn name(&self) -> &str {
            self.0
        }

        fn process(
            &self,
            _context: &BuildContext<'_>,
            collection: &Collection,
        ) -> Result<Option<Collection>, SquareError> {
            let mut next = collection.clone();
            next.content = self.1.to_string();
            Ok(Some(next))
        }
    }

    struct Noop;

    impl Middleware for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn process(
            &self,
            _context: &BuildContext<'_>,
            _collection: &Collection,
        ) -> Result<Option<Collection>, SquareError> {
            Ok(None)
        }
    }

    struct Failing;

    impl Middleware for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn process(
            &self,
            _context: &BuildContext<'_>,
            _collection: &Collection,
        ) -> Result<Option<Collection>, SquareError> {
            Err(SquareError::Middleware {
                name: "failing".to_string(),
                message: "nope".to_string(),
            })
        }
    }

    struct Panicking;

    impl Middleware for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn process(
            &self,
            _context: &BuildContext<'_>,
            _collection: &Collection,
        ) -> Result<Option<Collection>, SquareError> {
            panic!("middleware exploded")
        }
    }

    struct MinOnly;

    impl Middleware for MinOnly {
        fn name(&self) -> &str {
            "min-only"
        }

        fn distributions(&self) -> &[Distribution] {
            &[Distribution::Min]
        }

        fn process(
            &self,
            _context: &BuildContext<'_>,
            collection: &Collection,
        ) -> Result<Option<Collection>, SquareError> {
            let mut next = collection.clone();
            next.content.push_str(" minified");
            Ok(Some(next))
        }
    }

    fn run(pipeline: &Pipeline, collection: Collection) -> Outcome {
        let package = Package::default();
        let tagger = Tagger::new(".");
        let context = BuildContext {
            package: &package,
            tagger: &tagger,
        };
        pipeline.for_each(&context, collection)
    }

    fn collection() -> Collection {
        Collection::new("original", "js", "web", Distribution::Min)
    }

    #[test]
    fn test_no_result_rolls_back_to_last_good() {
        let mut pipeline = Pipeline::new();
        pipeline.use_middleware(Box::new(Replace("a", "X")));
        pipeline.use_middleware(Box::new(Noop));

        let outcome = run(&pipeline, collection());
        assert!(outcome.error.is_none());
        assert_eq!(outcome.collection.content, "X");
    }

    #[test]
    fn test_error_keeps_last_good_and_stops() {
        let mut pipeline = Pipeline::new();
        pipeline.use_middleware(Box::new(Replace("a", "X")));
        pipeline.use_middleware(Box::new(Failing));
        pipeline.use_middleware(Box::new(Replace("b", "Y")));

        let outcome = run(&pipeline, collection());
        assert_eq!(outcome.collection.content, "X");
        assert!(matches!(outcome.error, Some(SquareError::Middleware { .. })));
    }

    #[test]
    fn test_panic_is_converted_into_error() {
        let mut pipeline = Pipeline::new();
        pipeline.use_middleware(Box::new(Panicking));

        let outcome = run(&pipeline, collection());
        assert_eq!(outcome.collection.content, "original");
        match outcome.into_result() {
            Err(SquareError::Middleware { name, message }) => {
                assert_eq!(name, "panicking");
                assert_eq!(message, "middleware exploded");
            }
            other => panic!("expected a middleware error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.use_middleware(Box::new(Noop)));
        assert!(!pipeline.use_middleware(Box::new(Noop)));
        assert_eq!(pipeline.len(), 1);
        assert_eq!(pipeline.names(), vec!["noop"]);
    }

    #[test]
    fn test_shared_middleware_joins_fresh_pipelines() {
        let shared: Arc<dyn Middleware> = Arc::new(Noop);
        for _ in 0..2 {
            let mut pipeline = Pipeline::new();
            assert!(pipeline.use_middleware(Box::new(Replace("a", "first"))));
            assert!(pipeline.use_shared(Arc::clone(&shared)));
            assert!(!pipeline.use_shared(Arc::clone(&shared)));
            assert_eq!(pipeline.names(), vec!["a", "noop"]);
        }
    }

    #[test]
    fn test_runs_in_registration_order() {
        let mut pipeline = Pipeline::new();
        pipeline.use_middleware(Box::new(Replace("a", "first")));
        pipeline.use_middleware(Box::new(MinOnly));

        let outcome = run(&pipeline, collection());
        assert_eq!(outcome.collection.content, "first minified");
    }

    #[test]
    fn test_distribution_filter() {
        let mut pipeline = Pipeline::new();
        pipeline.use_middleware(Box::new(MinOnly));

        let dev = Collection::new("code", "js", "web", Distribution::Dev);
        assert_eq!(run(&pipeline, dev).collection.content, "code");
    }
}
