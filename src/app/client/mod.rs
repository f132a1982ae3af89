//! XNAT archive client
//!
//! [`ArchiveClient`] exposes typed read and mutate operations on one XNAT
//! server, built on the resilient request layer.
//!
//! The module is organized into specialized components:
//! - `config`: HTTP client configuration and per-request retry policies
//! - `session`: login, re-login on expiry and logout
//! - `http`: the retrying request loop
//! - `download`: streamed downloads with atomic writes
//! - `upload`: file uploads with replayable bodies

use std::path::{Path, PathBuf};

use reqwest::Method;
use url::Url;

use crate::app::catalog::{parse_catalog, ResourceFile};
use crate::app::hash::Md5Hash;
use crate::app::models::{result_rows, row_text, Experiment, ExperimentPath, ResourceFolder, Subject};
use crate::auth::Credentials;
use crate::constants::{http as http_constants, xnat};
use crate::errors::{ArchiveError, ArchiveResult};

pub mod config;
pub mod download;
pub mod http;
pub mod session;
pub mod upload;

pub use config::{ClientConfig, RequestPolicy};
pub use session::Session;

use download::DownloadHandler;
use http::{ArchiveRequest, HttpHandler, RequestBody};
use upload::UploadHandler;

/// Typed client for one XNAT server
#[derive(Debug)]
pub struct ArchiveClient {
    http_handler: HttpHandler,
    base_url: Url,
}

impl ArchiveClient {
    /// Opens a session on `server` and wraps it in a client
    ///
    /// # Arguments
    ///
    /// * `server` - Normalized base URL of the server
    /// * `credentials` - Username and password
    /// * `config` - Transport and retry configuration
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError` if the URL is invalid or logging in fails
    pub async fn connect(
        server: &str,
        credentials: Credentials,
        config: ClientConfig,
    ) -> ArchiveResult<Self> {
        let base_url = Url::parse(server).map_err(|e| ArchiveError::InvalidUrl {
            url: server.to_string(),
            error: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ArchiveError::InvalidUrl {
                url: server.to_string(),
                error: "not a base URL".to_string(),
            });
        }

        let session = Session::open(server, credentials, config).await?;
        let http_handler = HttpHandler::new(session)?;

        Ok(Self {
            http_handler,
            base_url,
        })
    }

    /// Base URL of the server
    pub fn server(&self) -> &str {
        self.http_handler.session().server()
    }

    /// Logs out; dropping an unclosed client logs out in the background
    pub async fn close(&self) {
        self.http_handler.session().close().await;
    }

    fn policies(&self) -> &ClientConfig {
        self.http_handler.session().config()
    }

    /// Builds `{base}/{segments...}?{query}`, percent-encoding each segment
    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> ArchiveResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ArchiveError::InvalidUrl {
                    url: self.base_url.to_string(),
                    error: "not a base URL".to_string(),
                })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn experiment_endpoint(
        &self,
        target: &ExperimentPath,
        extra: &[&str],
        query: &[(&str, &str)],
    ) -> ArchiveResult<Url> {
        let mut segments = vec![
            "data",
            "archive",
            "projects",
            target.project.as_str(),
            "subjects",
            target.subject.as_str(),
            "experiments",
            target.experiment.as_str(),
        ];
        segments.extend_from_slice(extra);
        self.endpoint(&segments, query)
    }

    /// Sends a mutation whose 404 answer means the parent record is missing
    async fn mutate(&self, request: ArchiveRequest, what: &str) -> ArchiveResult<()> {
        self.http_handler.send_expecting(&request, what).await?;
        Ok(())
    }

    async fn listing(&self, url: Url, column: &str) -> ArchiveResult<Vec<String>> {
        let what = url.to_string();
        match self.http_handler.get_json(url, self.policies().query).await? {
            Some(value) => Ok(result_rows(&value, &what)?
                .iter()
                .filter_map(|row| row_text(row, column))
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    // Listings

    /// IDs of every project the user can see
    pub async fn list_projects(&self) -> ArchiveResult<Vec<String>> {
        let url = self.endpoint(&["data", "archive", "projects", ""], &[("format", "json")])?;
        self.listing(url, "ID").await
    }

    /// Labels of every subject in a project
    pub async fn list_subject_labels(&self, project: &str) -> ArchiveResult<Vec<String>> {
        let url = self.endpoint(
            &["data", "archive", "projects", project, "subjects", ""],
            &[("format", "json")],
        )?;
        self.listing(url, "label").await
    }

    /// Labels of the experiments in a project, optionally of one subject only
    pub async fn list_experiment_labels(
        &self,
        project: &str,
        subject: Option<&str>,
    ) -> ArchiveResult<Vec<String>> {
        let mut segments = vec!["data", "projects", project];
        if let Some(subject) = subject {
            segments.extend(["subjects", subject]);
        }
        segments.extend(["experiments", ""]);
        let url = self.endpoint(&segments, &[("format", "json")])?;
        self.listing(url, "label").await
    }

    // Subjects and experiments

    /// Looks up a subject; `None` if it doesn't exist
    pub async fn find_subject(&self, project: &str, label: &str) -> ArchiveResult<Option<Subject>> {
        let url = self.endpoint(
            &["data", "archive", "projects", project, "subjects", label],
            &[("format", "json")],
        )?;
        match self.http_handler.get_json(url, self.policies().query).await? {
            Some(value) => Subject::from_json(&value).map(Some),
            None => Ok(None),
        }
    }

    /// Gets a subject, creating it first when `create` is set
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::NotFound` if the subject doesn't exist and
    /// `create` is false, or it still can't be found after creation.
    pub async fn get_subject(&self, project: &str, label: &str, create: bool) -> ArchiveResult<Subject> {
        let what = || format!("Subject {} in project {}", label, project);

        if let Some(subject) = self.find_subject(project, label).await? {
            return Ok(subject);
        }
        if !create {
            return Err(ArchiveError::not_found(what()));
        }

        tracing::info!("Creating {} in project {}", label, project);
        self.create_subject(project, label).await?;
        self.find_subject(project, label)
            .await?
            .ok_or_else(|| ArchiveError::not_found(what()))
    }

    /// Looks up an experiment; `None` if it doesn't exist
    pub async fn find_experiment(&self, target: &ExperimentPath) -> ArchiveResult<Option<Experiment>> {
        let url = self.experiment_endpoint(target, &[], &[("format", "json")])?;
        match self.http_handler.get_json(url, self.policies().query).await? {
            Some(value) => Experiment::from_json(&target.project, &target.subject, &value).map(Some),
            None => Ok(None),
        }
    }

    /// Gets an experiment, creating it first when `create` is set
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::NotFound` if the experiment doesn't exist and
    /// `create` is false, or it still can't be found after creation.
    pub async fn get_experiment(&self, target: &ExperimentPath, create: bool) -> ArchiveResult<Experiment> {
        let what = || format!("Experiment {}", target);

        if let Some(experiment) = self.find_experiment(target).await? {
            return Ok(experiment);
        }
        if !create {
            return Err(ArchiveError::not_found(what()));
        }

        tracing::info!("Creating experiment {}", target);
        self.create_experiment(target).await?;
        self.find_experiment(target)
            .await?
            .ok_or_else(|| ArchiveError::not_found(what()))
    }

    /// Creates an empty subject
    pub async fn create_subject(&self, project: &str, label: &str) -> ArchiveResult<()> {
        let url = self.endpoint(&["data", "archive", "projects", project, "subjects", label], &[])?;
        self.mutate(
            ArchiveRequest::put(url, self.policies().mutation),
            &format!("Project {}", project),
        )
        .await
    }

    /// Creates an empty MR session
    pub async fn create_experiment(&self, target: &ExperimentPath) -> ArchiveResult<()> {
        let url = self.experiment_endpoint(target, &[], &[("xsiType", xnat::MR_SESSION_XSI_TYPE)])?;
        self.mutate(
            ArchiveRequest::put(url, self.policies().mutation),
            &format!("Subject {} in project {}", target.subject, target.project),
        )
        .await
    }

    // Resource folders

    /// Resource folders attached to an experiment
    pub async fn list_resource_folders(&self, target: &ExperimentPath) -> ArchiveResult<Vec<ResourceFolder>> {
        let url = self.experiment_endpoint(target, &["resources", ""], &[("format", "json")])?;
        let what = url.to_string();
        let Some(value) = self.http_handler.get_json(url, self.policies().query).await? else {
            return Ok(Vec::new());
        };

        let count = |row: &serde_json::Value, key: &str| {
            row_text(row, key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };

        Ok(result_rows(&value, &what)?
            .iter()
            .map(|row| ResourceFolder {
                label: row_text(row, "label").unwrap_or_else(|| xnat::NO_LABEL.to_string()),
                resource_id: row_text(row, "xnat_abstractresource_id").unwrap_or_default(),
                file_count: count(row, "file_count"),
                file_size: count(row, "file_size"),
            })
            .collect())
    }

    /// Resource group ID of the folder labelled `label`
    ///
    /// The folder is created only when `create` is set; read-only callers
    /// must pass `false`.
    pub async fn resource_folder_id(
        &self,
        target: &ExperimentPath,
        label: &str,
        create: bool,
    ) -> ArchiveResult<Option<String>> {
        let find = |folders: Vec<ResourceFolder>| {
            folders
                .into_iter()
                .find(|folder| folder.label == label)
                .map(|folder| folder.resource_id)
        };

        if let Some(id) = find(self.list_resource_folders(target).await?) {
            return Ok(Some(id));
        }
        if !create {
            return Ok(None);
        }

        self.create_resource_folder(target, label).await?;
        Ok(find(self.list_resource_folders(target).await?))
    }

    /// Creates a resource folder
    pub async fn create_resource_folder(&self, target: &ExperimentPath, label: &str) -> ArchiveResult<()> {
        tracing::info!("Creating resource folder {} on {}", label, target);
        let url = self.experiment_endpoint(target, &["resources", label, ""], &[])?;
        self.mutate(
            ArchiveRequest::put(url, self.policies().mutation),
            &format!("Experiment {}", target),
        )
        .await
    }

    /// Files in a resource folder, read from its XML catalog
    pub async fn list_resource_files(
        &self,
        target: &ExperimentPath,
        resource_id: &str,
    ) -> ArchiveResult<Vec<ResourceFile>> {
        let url = self.experiment_endpoint(target, &["resources", resource_id, ""], &[("format", "xml")])?;
        match self.http_handler.get_text(url, self.policies().query).await? {
            Some(xml) => parse_catalog(&xml),
            None => Ok(Vec::new()),
        }
    }

    // Uploads and deletion

    /// Imports a zip of DICOM files into an experiment, replacing existing data
    pub async fn upload_dicom_archive(&self, target: &ExperimentPath, zip_path: &Path) -> ArchiveResult<()> {
        let url = self.endpoint(
            &["data", "services", "import"],
            &[
                ("project", target.project.as_str()),
                ("subject", target.subject.as_str()),
                ("session", target.experiment.as_str()),
                ("overwrite", "delete"),
                ("prearchive", "false"),
                ("inbody", "true"),
            ],
        )?;
        UploadHandler::new(&self.http_handler)
            .upload_file(url, zip_path, Some(http_constants::ZIP_CONTENT_TYPE), true)
            .await?;
        Ok(())
    }

    /// Uploads one file into a resource folder, creating the experiment and
    /// folder when missing
    ///
    /// `file_name` may contain `/` to place the file in a sub-directory of
    /// the folder; every path component is percent-encoded.
    pub async fn upload_resource_file(
        &self,
        target: &ExperimentPath,
        folder: &str,
        file_name: &str,
        local_path: &Path,
    ) -> ArchiveResult<()> {
        self.get_experiment(target, true).await?;
        let resource_id = self
            .resource_folder_id(target, folder, true)
            .await?
            .ok_or_else(|| ArchiveError::not_found(format!("Resource folder {} on {}", folder, target)))?;

        let mut extra = vec!["resources", resource_id.as_str(), "files"];
        extra.extend(path_components(file_name));
        let url = self.experiment_endpoint(target, &extra, &[("inbody", "true")])?;

        UploadHandler::new(&self.http_handler)
            .upload_file(url, local_path, None, false)
            .await?;
        Ok(())
    }

    /// Deletes one file from a resource folder; a missing file is not an error
    pub async fn delete_resource_file(
        &self,
        target: &ExperimentPath,
        resource_id: &str,
        file_id: &str,
    ) -> ArchiveResult<()> {
        let mut extra = vec!["resources", resource_id, "files"];
        extra.extend(path_components(file_id));
        let url = self.experiment_endpoint(target, &extra, &[])?;

        let request = ArchiveRequest::delete(url, self.policies().mutation);
        if self.http_handler.send(&request).await?.is_none() {
            tracing::debug!("{} was already gone", request.url);
        }
        Ok(())
    }

    // Renames and shares

    /// Issues a single subject rename request
    ///
    /// The archive's answer is not trustworthy; use the rename engine to get
    /// a verified outcome.
    pub async fn rename_subject(&self, project: &str, old: &str, new: &str) -> ArchiveResult<()> {
        let url = self.endpoint(
            &["data", "archive", "projects", project, "subjects", old],
            &[("xsiType", xnat::MR_SESSION_XSI_TYPE), ("label", new)],
        )?;
        self.mutate(
            ArchiveRequest::put(url, self.policies().mutation),
            &format!("Subject {} in project {}", old, project),
        )
        .await
    }

    /// Issues a single experiment rename request
    pub async fn rename_experiment(
        &self,
        project: &str,
        subject: &str,
        old: &str,
        new: &str,
    ) -> ArchiveResult<()> {
        let target = ExperimentPath::new(project, subject, old);
        let url = self.experiment_endpoint(
            &target,
            &[],
            &[("xsiType", xnat::MR_SESSION_XSI_TYPE), ("label", new)],
        )?;
        self.mutate(
            ArchiveRequest::put(url, self.policies().mutation),
            &format!("Experiment {}", target),
        )
        .await
    }

    /// Shares a subject into another project under `dest_subject`
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::NameInUse` if `dest_subject` already exists in
    /// `dest_project`, `ArchiveError::NotFound` if the source subject doesn't.
    pub async fn share_subject(
        &self,
        source_project: &str,
        source_subject: &str,
        dest_project: &str,
        dest_subject: &str,
    ) -> ArchiveResult<()> {
        self.get_subject(source_project, source_subject, false).await?;

        let url = self.endpoint(
            &["data", "projects", source_project, "subjects", source_subject, "projects", dest_project],
            &[("label", dest_subject)],
        )?;
        self.share(url, source_subject, dest_subject).await
    }

    /// Shares an experiment into another project under `dest_experiment`
    ///
    /// The subject must already be shared into `dest_project`.
    pub async fn share_experiment(
        &self,
        source: &ExperimentPath,
        dest_project: &str,
        dest_experiment: &str,
    ) -> ArchiveResult<()> {
        self.get_experiment(source, false).await?;

        let url = self.endpoint(
            &[
                "data",
                "projects",
                source.project.as_str(),
                "subjects",
                source.subject.as_str(),
                "experiments",
                source.experiment.as_str(),
                "projects",
                dest_project,
            ],
            &[("label", dest_experiment)],
        )?;
        self.share(url, &source.experiment, dest_experiment).await
    }

    async fn share(&self, url: Url, source: &str, dest: &str) -> ArchiveResult<()> {
        let request = ArchiveRequest::put(url, self.policies().mutation);
        match self.http_handler.send_expecting(&request, source).await {
            Ok(_) => {
                tracing::info!("Shared {} as {}", source, dest);
                Ok(())
            }
            Err(ArchiveError::Conflict { status: 409, .. }) => Err(ArchiveError::NameInUse {
                name: dest.to_string(),
                reason: format!("can't share {} under a name that already exists", source),
            }),
            Err(e) => Err(e),
        }
    }

    // Workflows

    /// IDs of the AutoRun.xml workflows recorded for an experiment
    pub async fn find_autorun_workflows(&self, experiment: &Experiment) -> ArchiveResult<Vec<String>> {
        let url = self.endpoint(&["data", "search"], &[("format", "json")])?;
        let body = autorun_search(&experiment.id, &experiment.project);
        let request = ArchiveRequest::new(Method::POST, url, self.policies().query)
            .with_body(RequestBody::Bytes(body.into_bytes()))
            .with_content_type("text/xml");

        let Some(response) = self.http_handler.send(&request).await? else {
            return Ok(Vec::new());
        };
        let text = response.text().await?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| ArchiveError::parse("workflow search", e))?;

        Ok(match result_rows(&value, "workflow search") {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| row_text(row, "workflow_id"))
                .collect(),
            Err(_) => Vec::new(),
        })
    }

    /// Marks every AutoRun.xml workflow of an experiment Complete
    ///
    /// Returns how many workflows were dismissed.
    pub async fn dismiss_autorun(&self, experiment: &Experiment) -> ArchiveResult<usize> {
        let workflows = self.find_autorun_workflows(experiment).await?;
        for workflow in &workflows {
            let url = self.endpoint(
                &["data", "workflows", workflow],
                &[("wrk:workflowData/status", "Complete")],
            )?;
            self.mutate(
                ArchiveRequest::put(url, self.policies().mutation),
                &format!("Workflow {}", workflow),
            )
            .await?;
            tracing::debug!("Dismissed AutoRun workflow {} for {}", workflow, experiment.label);
        }
        Ok(workflows.len())
    }

    // Downloads

    /// Downloads one series as a zip archive
    ///
    /// # Arguments
    ///
    /// * `target` - The experiment holding the series
    /// * `series` - Series number
    /// * `format` - Resource label of the series data, usually `DICOM`
    /// * `destination` - Where to write the archive
    pub async fn download_series(
        &self,
        target: &ExperimentPath,
        series: &str,
        format: &str,
        destination: &Path,
    ) -> ArchiveResult<PathBuf> {
        let url = self.experiment_endpoint(
            target,
            &["scans", series, "resources", format, "files"],
            &[("format", "zip")],
        )?;
        DownloadHandler::new(&self.http_handler)
            .download_file(url, destination, None, true)
            .await
    }

    /// Downloads one file of a resource folder
    ///
    /// `uri` may be percent-encoded as it appears in the catalog. When
    /// `expected` is given and the file is fetched unzipped, the download
    /// is verified against it. Unzipped files may be empty.
    pub async fn download_resource(
        &self,
        target: &ExperimentPath,
        resource_id: &str,
        uri: &str,
        zipped: bool,
        expected: Option<Md5Hash>,
        destination: &Path,
    ) -> ArchiveResult<PathBuf> {
        let bytes = urlencoding::decode_binary(uri.as_bytes());
        let decoded = String::from_utf8_lossy(&bytes);
        let mut extra = vec!["resources", resource_id, "files"];
        extra.extend(path_components(&decoded));
        let query: &[(&str, &str)] = if zipped { &[("format", "zip")] } else { &[] };
        let url = self.experiment_endpoint(target, &extra, query)?;

        let expected = if zipped { None } else { expected };
        DownloadHandler::new(&self.http_handler)
            .download_file(url, destination, expected, zipped)
            .await
    }

    /// Downloads a whole resource folder as a zip archive
    pub async fn download_resource_archive(
        &self,
        target: &ExperimentPath,
        resource_id: &str,
        destination: &Path,
    ) -> ArchiveResult<PathBuf> {
        let url = self.experiment_endpoint(
            target,
            &["resources", resource_id, "files"],
            &[("format", "zip")],
        )?;
        DownloadHandler::new(&self.http_handler)
            .download_file(url, destination, None, true)
            .await
    }
}

/// Non-empty `/`-separated components of a file path inside a folder
fn path_components(name: &str) -> impl Iterator<Item = &str> {
    name.split('/').filter(|part| !part.is_empty())
}

/// Stored search for AutoRun.xml workflows of one experiment
fn autorun_search(experiment_id: &str, project: &str) -> String {
    format!(
        r#"<xdat:bundle xmlns:xdat="http://nrg.wustl.edu/security" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="@wrk:workflowData" brief-description="" description="" allow-diff-columns="0" secure="false">
    <xdat:root_element_name>wrk:workflowData</xdat:root_element_name>
    <xdat:search_field>
        <xdat:element_name>wrk:workflowData</xdat:element_name>
        <xdat:field_ID>pipeline_name</xdat:field_ID>
        <xdat:sequence>0</xdat:sequence>
        <xdat:type>string</xdat:type>
        <xdat:header>wrk:workflowData/pipeline_name</xdat:header>
    </xdat:search_field>
    <xdat:search_field>
        <xdat:element_name>wrk:workflowData</xdat:element_name>
        <xdat:field_ID>wrk_workflowData_id</xdat:field_ID>
        <xdat:sequence>1</xdat:sequence>
        <xdat:type>string</xdat:type>
        <xdat:header>wrk:workflowData/wrk_workflowData_id</xdat:header>
    </xdat:search_field>
    <xdat:search_where method="AND">
        <xdat:criteria override_value_formatting="0">
            <xdat:schema_field>wrk:workflowData/ID</xdat:schema_field>
            <xdat:comparison_type>LIKE</xdat:comparison_type>
            <xdat:value>{experiment_id}</xdat:value>
        </xdat:criteria>
        <xdat:criteria override_value_formatting="0">
            <xdat:schema_field>wrk:workflowData/ExternalID</xdat:schema_field>
            <xdat:comparison_type>=</xdat:comparison_type>
            <xdat:value>{project}</xdat:value>
        </xdat:criteria>
        <xdat:criteria override_value_formatting="0">
            <xdat:schema_field>wrk:workflowData/pipeline_name</xdat:schema_field>
            <xdat:comparison_type>=</xdat:comparison_type>
            <xdat:value>{pipeline}</xdat:value>
        </xdat:criteria>
    </xdat:search_where>
</xdat:bundle>"#,
        experiment_id = experiment_id,
        project = project,
        pipeline = xnat::AUTORUN_PIPELINE,
    )
}
