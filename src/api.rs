use crate::compiler::Compilers;
use crate::error::{SquareError, SquareResult};
use crate::manifest::ManifestSource;
use crate::model::{Collection, Distribution, Package};
use crate::parser;
use crate::pipeline::{BuildContext, Middleware, Pipeline};
use crate::plugins::{License, PluginRegistry};
use crate::preprocess;
use crate::storage::{DiskStorage, Storage};
use crate::template::Tagger;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Platform used when a build doesn't name one.
pub const DEFAULT_PLATFORM: &str = "web";

/// One file written by a build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOutput {
    pub distribution: Distribution,
    pub extension: String,
    pub location: PathBuf,
    pub bytes: usize,
}

/// Everything a successful build produced, in the order it was stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub platform: String,
    pub outputs: Vec<BuildOutput>,
}

/// Notified after every successful build, e.g. by a long-lived watch process.
pub trait BuildObserver: Send + Sync {
    fn on_build(&self, report: &BuildReport);
}

/// The build orchestrator: owns the parsed package and everything needed to
/// turn it into distribution files.
pub struct Square {
    package: Option<Package>,
    compilers: Compilers,
    plugins: PluginRegistry,
    pipeline: Pipeline,
    // Registered through `use_middleware`, kept across parses
    middleware: Vec<Arc<dyn Middleware>>,
    storage: Box<dyn Storage>,
    tagger: Tagger,
    observers: Vec<Box<dyn BuildObserver>>,
}

impl Default for Square {
    fn default() -> Self {
        Self::new()
    }
}

impl Square {
    pub fn new() -> Self {
        Square {
            package: None,
            compilers: Compilers::with_defaults(),
            plugins: PluginRegistry::with_defaults(),
            pipeline: Pipeline::new(),
            middleware: Vec::new(),
            storage: Box::new(DiskStorage),
            tagger: Tagger::new("."),
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_compilers(mut self, compilers: Compilers) -> Self {
        self.compilers = compilers;
        self
    }

    #[must_use]
    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    #[must_use]
    pub fn with_storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Box::new(storage);
        self
    }

    #[must_use]
    pub fn with_tagger(mut self, tagger: Tagger) -> Self {
        self.tagger = tagger;
        self
    }

    /// Appends `middleware` to the pipeline. It survives later parses and
    /// always runs after the plugins the manifest configures. Returns
    /// `false` when an identical middleware is already registered.
    pub fn use_middleware(&mut self, middleware: Box<dyn Middleware>) -> bool {
        let middleware: Arc<dyn Middleware> = Arc::from(middleware);
        if !self.pipeline.use_shared(Arc::clone(&middleware)) {
            return false;
        }
        self.middleware.push(middleware);
        true
    }

    pub fn observe(&mut self, observer: impl BuildObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn package(&self) -> Option<&Package> {
        self.package.as_ref()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Reads and normalizes a manifest, then configures the plugins it
    /// declares. A failed parse leaves any previously parsed package intact.
    ///
    /// # Errors
    /// Returns the first critical error met while normalizing. Plugins that
    /// fail to configure are logged and left out.
    pub fn parse(&mut self, source: impl Into<ManifestSource>) -> SquareResult<()> {
        let source = source.into();
        let package = match parser::parse(&source, &self.compilers) {
            Ok(package) => package,
            Err(e) => {
                if e.is_critical() {
                    error!("{}", e.report());
                }
                return Err(e);
            }
        };

        self.configure(&package);
        self.tagger.set_root(&package.path);

        info!(
            "parsed {} bundles into {} outputs",
            package.bundle.len(),
            package.meta.extensions.len()
        );
        self.package = Some(package);
        Ok(())
    }

    /// Rebuilds the pipeline from the manifest plugins, followed by the
    /// middleware registered through `use_middleware`.
    fn configure(&mut self, package: &Package) {
        let configuration = &package.configuration;
        let mut pipeline = Pipeline::new();

        for (name, options) in &configuration.plugins {
            if options.as_bool() == Some(false) {
                debug!("plugin {name} is disabled");
                continue;
            }
            match self.plugins.create(name, options) {
                Some(Ok(middleware)) => {
                    pipeline.use_middleware(middleware);
                }
                Some(Err(e)) => warn!("not using plugin {name}: {e}"),
                None => warn!("unknown plugin {name}, skipping it"),
            }
        }

        if configuration.license.is_some() && !configuration.plugins.contains_key("license") {
            pipeline.use_middleware(Box::new(License));
        }

        for middleware in &self.middleware {
            pipeline.use_shared(Arc::clone(middleware));
        }
        self.pipeline = pipeline;
    }

    /// Renders `input` against the tag context of the parsed package.
    pub fn template(&self, input: &str) -> String {
        match &self.package {
            Some(package) => self.tagger.render(input, None, &package.configuration),
            None => self.tagger.render(input, None, &Default::default()),
        }
    }

    /// Builds every configured distribution of `extensions` (all output
    /// extensions by default) for `platform` (`web` by default).
    ///
    /// # Errors
    /// Fails with [`SquareError::NotParsed`] before a successful `parse`,
    /// otherwise with the first compiler, middleware or storage error.
    pub fn build(
        &self,
        platform: Option<&str>,
        extensions: Option<&[String]>,
    ) -> SquareResult<BuildReport> {
        let Some(package) = &self.package else {
            let e = SquareError::NotParsed;
            error!("{}", e.report());
            return Err(e);
        };

        let platform = platform.unwrap_or(DEFAULT_PLATFORM);
        let extensions = match extensions {
            Some(extensions) => extensions.to_vec(),
            None => package.output_extensions(),
        };

        self.tagger.start();
        let result = self.run(package, platform, &extensions);
        self.tagger.stop();

        let report = result?;
        for observer in &self.observers {
            observer.on_build(&report);
        }
        Ok(report)
    }

    fn run(
        &self,
        package: &Package,
        platform: &str,
        extensions: &[String],
    ) -> SquareResult<BuildReport> {
        let context = BuildContext {
            package,
            tagger: &self.tagger,
        };
        let buffers = preprocess::reduce(package, platform, extensions)?;

        let mut report = BuildReport {
            platform: platform.to_string(),
            outputs: Vec::new(),
        };
        for (extension, content) in buffers {
            for (distribution, destination) in &package.configuration.dist {
                let collection =
                    Collection::new(content.clone(), &extension, platform, *distribution);
                let mut collection = self.pipeline.for_each(&context, collection).into_result()?;

                let relative =
                    self.tagger
                        .render(destination, Some(&collection), &package.configuration);
                let location = package.resolve(relative);
                collection.location = Some(location.clone());

                self.storage.store(&context, &collection)?;
                debug!("{distribution} {extension} stored at {}", location.display());

                report.outputs.push(BuildOutput {
                    distribution: *distribution,
                    extension: extension.clone(),
                    location,
                    bytes: collection.content.len(),
                });
            }
        }
        Ok(report)
    }

    /// Picks up changes to `paths`. A changed manifest is parsed again; a
    /// changed bundle has its content re-read. Returns whether anything the
    /// package depends on was among `paths`.
    ///
    /// # Errors
    /// Fails when nothing was parsed yet, or when re-reading fails.
    pub fn refresh(&mut self, paths: &[PathBuf]) -> SquareResult<bool> {
        let Some(package) = &mut self.package else {
            return Err(SquareError::NotParsed);
        };

        let changed: HashSet<PathBuf> = paths.iter().map(|p| package.resolve(p)).collect();

        if let Some(location) = package.location.clone() {
            if changed.contains(&location) {
                info!("manifest changed, parsing {} again", location.display());
                self.parse(location)?;
                return Ok(true);
            }
        }

        let mut touched = false;
        for entry in package.bundle.values_mut() {
            if changed.contains(&entry.meta.location) {
                debug!("re-reading {}", entry.meta.key);
                entry.content = std::fs::read_to_string(&entry.meta.location)
                    .map_err(|e| SquareError::io(&entry.meta.location, e))?;
                touched = true;
            }
        }

        if !touched {
            touched = self.watch_list().iter().any(|path| changed.contains(path));
        }
        Ok(touched)
    }

    /// Every file a rebuild depends on: the manifest, bundles, dependencies
    /// and whatever the compilers report as imported.
    pub fn watch_list(&self) -> Vec<PathBuf> {
        let Some(package) = &self.package else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut files = Vec::new();
        let mut push = |path: &Path, files: &mut Vec<PathBuf>| {
            if seen.insert(path.to_path_buf()) {
                files.push(path.to_path_buf());
            }
        };

        if let Some(location) = &package.location {
            push(location.as_path(), &mut files);
        }
        for path in package.meta.files.iter().chain(&package.meta.dependencies) {
            push(path.as_path(), &mut files);
        }

        let mut imported = HashSet::new();
        for entry in package.bundle.values() {
            if let Some(compiler) = &entry.meta.compiler {
                for path in compiler.imports(&entry.meta.location, &mut imported) {
                    push(path.as_path(), &mut files);
                }
            }
        }
        files
    }
}

/// Parses the manifest at `source` and builds every output to disk.
///
/// This is the one-shot entry point; long-lived callers keep a [`Square`]
/// around and use [`Square::refresh`] between builds.
///
/// # Errors
/// Returns any error from [`Square::parse`] or [`Square::build`].
pub fn bundle(source: impl Into<ManifestSource>) -> SquareResult<BuildReport> {
    let mut square = Square::new();
    square.parse(source)?;
    square.build(None, None)
}
