//! Public memorial page creation.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Multipart, State},
    response::{IntoResponse as _, Redirect, Response},
    routing::get,
};
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tower_sessions::Session;
use tracing::{error, info};

use super::unprocessable;
use crate::{
    AppState, Db, Error, Result, auth,
    config::AppConfig,
    db::{self, people},
    metrics::PEOPLE_CREATED,
    models::{EMAIL_MAX, IMAGE_URL_MAX, PERSON_DESCRIPTION_MAX, PERSON_NAME_MAX, Person},
    slug,
    storage::{ImageKind, ImageStorage, StorageError},
    validation::ValidationErrors,
};

/// The text inputs of the create form, echoed back when it is redisplayed.
#[derive(Debug, Default, Clone, Serialize)]
struct PersonInput {
    name: String,
    description: String,
    email: Option<String>,
    use_portrait_url: bool,
    portrait_url: Option<String>,
    use_background_url: bool,
    background_url: Option<String>,
}

struct Upload {
    file_name: String,
    content_type: Option<String>,
    bytes: Bytes,
}

#[derive(Default)]
struct CreatePersonForm {
    form_token: Option<String>,
    input: PersonInput,
    portrait_file: Option<Upload>,
    background_file: Option<Upload>,
}

#[derive(Serialize)]
struct CreatePersonView {
    form_token: String,
    max_upload_bytes: usize,
    values: PersonInput,
    errors: ValidationErrors,
}

fn non_blank(text: String) -> Option<String> {
    (!text.trim().is_empty()).then_some(text)
}

async fn read_form(mut multipart: Multipart) -> Result<CreatePersonForm> {
    let mut form = CreatePersonForm::default();

    while let Some(field) = multipart.next_field().await.map_err(Error::bad_request)? {
        let name = field.name().unwrap_or_default().to_owned();

        if name == "portrait_file" || name == "background_file" {
            let file_name = field.file_name().unwrap_or_default().to_owned();
            let content_type = field.content_type().map(str::to_owned);
            let bytes = field.bytes().await.map_err(Error::bad_request)?;

            // Browsers send an empty part when no file was chosen.
            let upload = (!bytes.is_empty()).then_some(Upload {
                file_name,
                content_type,
                bytes,
            });
            if name == "portrait_file" {
                form.portrait_file = upload;
            } else {
                form.background_file = upload;
            }
            continue;
        }

        let text = field.text().await.map_err(Error::bad_request)?;
        match name.as_str() {
            "form_token" => form.form_token = Some(text),
            "name" => form.input.name = text,
            "description" => form.input.description = text,
            "email" => form.input.email = non_blank(text),
            "use_portrait_url" => form.input.use_portrait_url = super::is_checked(&text),
            "portrait_url" => form.input.portrait_url = non_blank(text),
            "use_background_url" => form.input.use_background_url = super::is_checked(&text),
            "background_url" => form.input.background_url = non_blank(text),
            _ => {}
        }
    }

    Ok(form)
}

fn kind_label(kind: ImageKind) -> &'static str {
    match kind {
        ImageKind::Portrait => "Portrait",
        ImageKind::Background => "Background",
    }
}

fn file_field(kind: ImageKind) -> &'static str {
    match kind {
        ImageKind::Portrait => "portrait_file",
        ImageKind::Background => "background_file",
    }
}

fn validate_upload(
    errors: &mut ValidationErrors,
    kind: ImageKind,
    upload: Option<&Upload>,
    max_bytes: usize,
) {
    let Some(upload) = upload else {
        return;
    };

    let label = kind_label(kind);
    if !upload
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image/"))
    {
        errors.add(file_field(kind), format!("{label} file must be an image."));
    }
    if upload.bytes.len() > max_bytes {
        errors.add(
            file_field(kind),
            format!(
                "{label} file size must be less than {}MB.",
                max_bytes / (1024 * 1024)
            ),
        );
    }
}

fn validate(form: &CreatePersonForm, max_bytes: usize) -> ValidationErrors {
    let input = &form.input;
    let mut errors = ValidationErrors::new();

    errors.required("name", Some(input.name.as_str()), "Name is required");
    errors.max_len(
        "name",
        Some(input.name.as_str()),
        PERSON_NAME_MAX,
        "Name cannot exceed 200 characters",
    );
    errors.required(
        "description",
        Some(input.description.as_str()),
        "Description is required",
    );
    errors.max_len(
        "description",
        Some(input.description.as_str()),
        PERSON_DESCRIPTION_MAX,
        "Description cannot exceed 5000 characters",
    );
    errors.email("email", input.email.as_deref(), "Invalid email address");
    errors.max_len(
        "email",
        input.email.as_deref(),
        EMAIL_MAX,
        "Email cannot exceed 255 characters",
    );

    if input.use_portrait_url {
        errors.max_len(
            "portrait_url",
            input.portrait_url.as_deref(),
            IMAGE_URL_MAX,
            "Portrait URL cannot exceed 500 characters",
        );
    } else {
        validate_upload(
            &mut errors,
            ImageKind::Portrait,
            form.portrait_file.as_ref(),
            max_bytes,
        );
    }

    if input.use_background_url {
        errors.max_len(
            "background_url",
            input.background_url.as_deref(),
            IMAGE_URL_MAX,
            "Background URL cannot exceed 500 characters",
        );
    } else {
        validate_upload(
            &mut errors,
            ImageKind::Background,
            form.background_file.as_ref(),
            max_bytes,
        );
    }

    errors
}

/// Stored objects uploaded while handling one submission.
///
/// Removed again when the submission fails after the upload.
struct Uploaded<'a> {
    images: &'a ImageStorage,
    urls: Vec<String>,
}

impl Uploaded<'_> {
    async fn discard(self) {
        for url in &self.urls {
            self.images.delete_if_managed(Some(url)).await;
        }
    }
}

/// The reference to store for one picture: an external URL, a fresh upload, or nothing.
async fn store_image(
    uploaded: &mut Uploaded<'_>,
    kind: ImageKind,
    use_url: bool,
    url: Option<String>,
    upload: Option<Upload>,
) -> std::result::Result<Option<String>, StorageError> {
    if use_url {
        return Ok(url);
    }
    let Some(upload) = upload else {
        return Ok(None);
    };

    let url = uploaded
        .images
        .upload(kind, &upload.file_name, upload.bytes.to_vec())
        .await?;
    uploaded.urls.push(url.clone());
    Ok(Some(url))
}

/// Undo the uploads of a failed submission.
///
/// An undecodable file is the submitter's mistake and becomes a field error;
/// anything else is a server failure.
async fn upload_failed(
    uploaded: Uploaded<'_>,
    kind: ImageKind,
    err: StorageError,
) -> Result<ValidationErrors> {
    uploaded.discard().await;
    match err {
        StorageError::Decode(_) => Ok(ValidationErrors::single(
            file_field(kind),
            format!("{} file is not a readable image.", kind_label(kind)),
        )),
        err => Err(anyhow::Error::new(err)
            .context("failed to store uploaded image")
            .into()),
    }
}

/// Insert the new page, discarding this submission's uploads when the insert fails.
///
/// A slug taken between the availability check and the insert is a field error.
async fn insert_person(
    db: &Db,
    uploaded: Uploaded<'_>,
    person: &people::NewPerson,
) -> Result<std::result::Result<Person, ValidationErrors>> {
    match people::insert(db, person, Utc::now()).await {
        Ok(person) => Ok(Ok(person)),
        Err(err) if db::is_unique_violation(&err) => {
            uploaded.discard().await;
            Ok(Err(ValidationErrors::single(
                "name",
                "A farewell page with this name already exists",
            )))
        }
        Err(err) => {
            error!(slug = %person.slug, "failed to create person: {err}");
            uploaded.discard().await;
            Err(err.into())
        }
    }
}

/// The empty create form.
/// - GET `/FarewellPerson/Create`
async fn create_form(
    State(config): State<AppConfig>,
    session: Session,
) -> Result<Json<CreatePersonView>> {
    Ok(Json(CreatePersonView {
        form_token: auth::form_token(&session).await?,
        max_upload_bytes: config.storage.max_upload_bytes,
        values: PersonInput::default(),
        errors: ValidationErrors::new(),
    }))
}

/// Create a memorial page, uploading any chosen pictures.
/// - POST `/FarewellPerson/Create`
#[tracing::instrument(skip_all)]
async fn create(
    State(config): State<AppConfig>,
    State(db): State<Db>,
    State(images): State<ImageStorage>,
    session: Session,
    multipart: Multipart,
) -> Result<Response> {
    let form = read_form(multipart).await?;
    auth::verify_form_token(&session, form.form_token.as_deref()).await?;

    let max_bytes = config.storage.max_upload_bytes;
    let redisplay = |input: PersonInput, errors: ValidationErrors, form_token: String| {
        unprocessable(CreatePersonView {
            form_token,
            max_upload_bytes: max_bytes,
            values: input,
            errors,
        })
    };
    let token = auth::form_token(&session).await?;

    let mut errors = validate(&form, max_bytes);
    let slug = slug::slugify(&form.input.name);
    if !errors.has("name") {
        if slug.is_empty() {
            errors.add("name", "Name must contain at least one letter or digit");
        } else if slug::is_reserved(&slug) {
            errors.add("name", "This name is reserved, please choose another");
        } else if people::slug_exists(&db, &slug).await? {
            errors.add("name", "A farewell page with this name already exists");
        }
    }
    if !errors.is_empty() {
        return Ok(redisplay(form.input, errors, token));
    }

    let CreatePersonForm {
        input,
        portrait_file,
        background_file,
        ..
    } = form;
    let mut uploaded = Uploaded {
        images: &images,
        urls: Vec::new(),
    };

    let portrait_url = match store_image(
        &mut uploaded,
        ImageKind::Portrait,
        input.use_portrait_url,
        input.portrait_url.clone(),
        portrait_file,
    )
    .await
    {
        Ok(url) => url,
        Err(err) => {
            let errors = upload_failed(uploaded, ImageKind::Portrait, err).await?;
            return Ok(redisplay(input, errors, token));
        }
    };
    let background_url = match store_image(
        &mut uploaded,
        ImageKind::Background,
        input.use_background_url,
        input.background_url.clone(),
        background_file,
    )
    .await
    {
        Ok(url) => url,
        Err(err) => {
            let errors = upload_failed(uploaded, ImageKind::Background, err).await?;
            return Ok(redisplay(input, errors, token));
        }
    };

    let new_person = people::NewPerson {
        name: input.name.trim().to_owned(),
        slug,
        description: input.description.clone(),
        portrait_url,
        background_url,
        email: input.email.clone(),
    };

    let person = match insert_person(&db, uploaded, &new_person).await? {
        Ok(person) => person,
        Err(errors) => return Ok(redisplay(input, errors, token)),
    };

    counter!(PEOPLE_CREATED).increment(1);
    info!(person_id = person.id, slug = %person.slug, "person created");

    Ok(Redirect::to(&format!("/{}", person.slug)).into_response())
}

pub(super) fn routes() -> Router<AppState> {
    Router::new().route("/FarewellPerson/Create", get(create_form).post(create))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{ImageConfig, StorageConfig},
        storage::{ObjectStore as _, memory::MemoryStore},
    };

    fn images(store: Arc<MemoryStore>) -> ImageStorage {
        let config = StorageConfig {
            endpoint: "https://s3.example.com".to_owned(),
            bucket: "farewell".to_owned(),
            region: "us-east-1".to_owned(),
            access_key: "k".to_owned(),
            secret_key: "s".to_owned(),
            signed_url_ttl_secs: 3600,
            max_upload_bytes: 1024 * 1024,
        };
        ImageStorage::new(store, &config, ImageConfig::default())
    }

    fn new_person(slug: &str, portrait_url: Option<String>) -> people::NewPerson {
        people::NewPerson {
            name: "Jane Doe".to_owned(),
            slug: slug.to_owned(),
            description: "Remembered.".to_owned(),
            portrait_url,
            background_url: None,
            email: None,
        }
    }

    #[tokio::test]
    async fn slug_taken_at_insert_discards_uploads() {
        let db = crate::db::test_pool().await;
        let store = Arc::new(MemoryStore::default());
        let images = images(store.clone());
        _ = people::insert(&db, &new_person("jane-doe", None), Utc::now())
            .await
            .unwrap();

        store
            .put("portrait/1-jane.jpg", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        let url = "https://s3.example.com/farewell/portrait/1-jane.jpg".to_owned();
        let uploaded = Uploaded {
            images: &images,
            urls: vec![url.clone()],
        };

        let errors = insert_person(&db, uploaded, &new_person("jane-doe", Some(url)))
            .await
            .unwrap()
            .unwrap_err();
        assert!(errors.has("name"));
        assert!(store.is_empty());
        assert_eq!(people::count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn successful_insert_keeps_uploads() {
        let db = crate::db::test_pool().await;
        let store = Arc::new(MemoryStore::default());
        let images = images(store.clone());

        store
            .put("portrait/1-jane.jpg", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        let url = "https://s3.example.com/farewell/portrait/1-jane.jpg".to_owned();
        let uploaded = Uploaded {
            images: &images,
            urls: vec![url.clone()],
        };

        let person = insert_person(&db, uploaded, &new_person("jane-doe", Some(url.clone())))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(person.portrait_url.as_deref(), Some(url.as_str()));
        assert_eq!(store.len(), 1);
    }
}
