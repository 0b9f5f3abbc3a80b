use bollard::query_parameters::{CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::secret::ImageInspect;
use tokio_stream::StreamExt;

use super::datetime::DateTime;
use super::{Client, DockerCredentials, Error, Result};

/// Repo-tag docker assigns to layers that lost their tag on a re-pull.
const DANGLING_TAG: &str = "<none>:<none>";

#[derive(Debug, Clone)]
pub struct Image<'a>(&'a Client);

impl<'a> Image<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self(client)
    }
}

impl Image<'_> {
    /// Returns the ids of the images known to the engine.
    ///
    /// Use in combination with [`Image::inspect`] to get the image
    /// information.
    pub async fn list(&self, all: bool) -> Result<Vec<String>> {
        let opts = ListImagesOptions {
            all,
            ..Default::default()
        };

        let images = self
            .0
            .inner()
            .list_images(Some(opts))
            .await
            .map_err(Error::ListImages)?;

        Ok(images.into_iter().map(|i| i.id).collect())
    }

    /// Returns low-level information about an image.
    pub async fn inspect(&self, reference: &str) -> Result<ImageRecord> {
        let info = self
            .0
            .inner()
            .inspect_image(reference)
            .await
            .map_err(|source| Error::InspectImage {
                reference: reference.to_owned(),
                source,
            })?;

        info.try_into()
    }

    /// Pulls an image from a registry, blocking until the pull finishes.
    pub async fn pull(
        &self,
        repo: &str,
        tag: &str,
        creds: Option<DockerCredentials>,
    ) -> Result<()> {
        let opts = Some(CreateImageOptions {
            from_image: Some(repo.to_owned()),
            tag: Some(tag.to_owned()),
            ..Default::default()
        });

        let mut stream = self.0.inner().create_image(opts, None, creds);
        while let Some(result) = stream.next().await {
            result.map_err(|source| Error::PullImage {
                reference: format!("{repo}:{tag}"),
                source,
            })?;
        }

        Ok(())
    }

    /// Removes an image, along with any untagged parent images that were
    /// referenced by that image.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.0
            .inner()
            .remove_image(id, None::<RemoveImageOptions>, None)
            .await
            .map_err(|source| Error::RemoveImage {
                id: id.to_owned(),
                source,
            })?;

        Ok(())
    }
}

impl TryFrom<ImageInspect> for ImageRecord {
    type Error = Error;

    fn try_from(value: ImageInspect) -> Result<Self> {
        let id = value
            .id
            .ok_or(Error::InvalidImageRecord("missing image id"))?;
        let repo_tags = value.repo_tags.unwrap_or_default();
        let created = value
            .created
            .unwrap_or_default()
            .parse()
            .unwrap_or_default();

        Ok(Self {
            id,
            repo_tags,
            created,
        })
    }
}

/// What the engine knows about a single image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// The content-addressable id of the image
    pub id: String,

    /// All `repo:tag` references pointing at this image
    pub repo_tags: Vec<String>,

    /// Image creation date
    pub created: DateTime,
}

impl ImageRecord {
    /// An image without any usable repo tag.
    pub fn is_dangling(&self) -> bool {
        self.repo_tags.is_empty()
            || (self.repo_tags.len() == 1 && self.repo_tags[0] == DANGLING_TAG)
    }

    pub fn has_repo_tag(&self, reference: &str) -> bool {
        self.repo_tags.iter().any(|t| t == reference)
    }
}
