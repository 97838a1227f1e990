use axum::extract::Multipart;

use crate::client::{FileType, ProjectFile};
use crate::error::{AppError, Result};

/// Form field carrying raw data files.
pub const RAW_FILES_FIELD: &str = "upload_raw_data_form-raw_data_files";

/// Form field carrying metadata files.
pub const METADATA_FILES_FIELD: &str = "upload_metadata_form-meta_data_files";

/// Public bucket URL of each file, filled in by the page after the direct upload.
pub const S3_URL_FIELD: &str = "s3url-hidden";

/// Bucket-relative path of each file.
pub const S3_PATH_FIELD: &str = "s3rpath-hidden";

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub contents: Vec<u8>,
}

/// Upload form contents.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub files: Vec<UploadedFile>,
    pub s3_urls: Vec<String>,
    pub s3_paths: Vec<String>,
}

impl UploadForm {
    /// Collect the files posted under `file_field` and the hidden bucket fields.
    ///
    /// File parts without a file name (an empty file input) are skipped.
    pub async fn from_multipart(mut multipart: Multipart, file_field: &str) -> Result<Self> {
        let mut form = UploadForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();

            if name == file_field {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let contents = field.bytes().await?.to_vec();
                if !file_name.is_empty() {
                    form.files.push(UploadedFile { file_name, contents });
                }
            } else if name == S3_URL_FIELD {
                form.s3_urls.push(field.text().await?);
            } else if name == S3_PATH_FIELD {
                form.s3_paths.push(field.text().await?);
            }
        }

        Ok(form)
    }

    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(AppError::Validation("Please choose at least one file.".to_string()));
        }
        Ok(())
    }

    /// Files to register, paired with their bucket URL and path by position.
    ///
    /// Pairs stop at the shortest of the three lists.
    pub fn project_files(&self, file_type: FileType) -> Vec<ProjectFile> {
        self.files
            .iter()
            .zip(&self.s3_urls)
            .zip(&self.s3_paths)
            .map(|((file, url), path)| ProjectFile {
                file_name: file.file_name.clone(),
                s3_link: url.clone(),
                relative_s3_path: path.clone(),
                file_type,
            })
            .collect()
    }

    /// Files to register, once every one of them has its bucket URL and path.
    ///
    /// # Errors
    /// * `Validation` if no file was chosen or any file lacks its bucket fields
    pub fn complete_files(&self, file_type: FileType) -> Result<Vec<ProjectFile>> {
        self.validate()?;
        let files = self.project_files(file_type);
        if files.len() != self.files.len() {
            return Err(AppError::Validation(
                "Every file must finish uploading before it can be registered.".to_string(),
            ));
        }
        Ok(files)
    }
}
