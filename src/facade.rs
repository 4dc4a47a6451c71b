//! The operation facade: thin, named wrappers over [`Endpoint::do_request`].
//! Every method here composes the engine; none of them talk to a socket
//! directly.

use bytes::Bytes;

use crate::engine::Endpoint;
use crate::error::Error;
use crate::headers::HeaderList;
use crate::list::{self, ListResult};
use crate::{digest, xml};

fn object_resource(bucket: &str, object: &str) -> String {
    format!("/{bucket}/{object}")
}

impl Endpoint {
    /// `HEAD /B/O`; success `{200, 404}`; true iff 200.
    pub async fn object_exists(&self, bucket: &str, object: &str) -> Result<bool, Error> {
        let resource = object_resource(bucket, object);
        let response = self
            .do_request("HEAD", &resource, HeaderList::new(), None, &[200, 404], false)
            .await?;
        Ok(response.code == 200)
    }

    /// `HEAD /B/O`; success `{200}`; returns `contentLen`.
    pub async fn object_size(&self, bucket: &str, object: &str) -> Result<i64, Error> {
        let resource = object_resource(bucket, object);
        let response = self
            .do_request("HEAD", &resource, HeaderList::new(), None, &[200], false)
            .await?;
        Ok(response.content_len)
    }

    /// `DELETE /B/O`; success `{200, 404}` — idempotent, 404 is success.
    pub async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), Error> {
        let resource = object_resource(bucket, object);
        self.do_request("DELETE", &resource, HeaderList::new(), None, &[200, 404], false)
            .await?;
        Ok(())
    }

    /// `PUT /B`; success `{200, 409}` — idempotent, 409 (already exists) is success.
    pub async fn create_bucket(&self, bucket: &str) -> Result<(), Error> {
        let resource = format!("/{bucket}");
        self.do_request("PUT", &resource, HeaderList::new(), None, &[200, 409], false)
            .await?;
        Ok(())
    }

    /// Lists the bucket and fans out a `delete_object` call per listed key,
    /// concurrently (see DESIGN.md for why this goes beyond a single
    /// `DELETE` call). Returns the number of objects actually deleted.
    pub async fn delete_bucket(&self, bucket: &str) -> Result<usize, Error> {
        let mut all = ListResult::default();
        self.list_bucket_stream(bucket, None, None, |page| {
            all.extend(page);
            Ok(())
        })
        .await?;

        let mut deletes = tokio::task::JoinSet::new();
        for object in all.objects {
            let endpoint = self.clone();
            let bucket = bucket.to_string();
            deletes.spawn(async move { endpoint.delete_object(&bucket, &object.name).await });
        }

        let mut deleted = 0usize;
        while let Some(outcome) = deletes.join_next().await {
            if matches!(outcome, Ok(Ok(()))) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// `GET /B/O`; success `{200, 404}`; 404 ⇒ [`Error::FileNotFound`].
    pub async fn read_entire_file(&self, bucket: &str, object: &str) -> Result<Bytes, Error> {
        let resource = object_resource(bucket, object);
        let response = self
            .do_request("GET", &resource, HeaderList::new(), None, &[200, 404], false)
            .await?;
        if response.code == 404 {
            return Err(Error::FileNotFound);
        }
        Ok(response.content)
    }

    /// `GET /B/O` with `Range: bytes=off-off+len-1`; success `{200, 206,
    /// 404}`. `len <= 0` returns an empty buffer without a request.
    pub async fn read_object(
        &self,
        bucket: &str,
        object: &str,
        offset: i64,
        len: i64,
    ) -> Result<Bytes, Error> {
        if len <= 0 {
            return Ok(Bytes::new());
        }
        let resource = object_resource(bucket, object);
        let mut headers = HeaderList::new();
        headers.set("Range", format!("bytes={offset}-{}", offset + len - 1));

        let response = self
            .do_request("GET", &resource, headers, None, &[200, 206, 404], false)
            .await?;
        if response.code == 404 {
            return Err(Error::FileNotFound);
        }
        if response.content_len != response.content.len() as i64 {
            return Err(Error::IoError(format!(
                "contentLen {} does not match delivered body of {} bytes",
                response.content_len,
                response.content.len()
            )));
        }
        let take = (len as usize).min(response.content.len());
        Ok(response.content.slice(0..take))
    }

    /// `PUT /B/O` with a `Content-MD5` digest of `content`; success
    /// `{200}`. Acquires the `concurrent_uploads` gate.
    pub async fn write_entire_file_from_buffer(
        &self,
        bucket: &str,
        object: &str,
        content: Bytes,
    ) -> Result<(), Error> {
        if content.is_empty() {
            return Err(Error::FileNotWritable);
        }
        if content.len() as i64 > self.knobs().multipart_max_part_size {
            return Err(Error::FileTooLarge);
        }

        let digest = digest::md5_base64(&content);
        let mut headers = HeaderList::new();
        headers.set("Content-MD5", digest.clone());

        let resource = object_resource(bucket, object);
        let response = self
            .do_request("PUT", &resource, headers, Some(content), &[200], true)
            .await?;

        if response.header("Content-MD5").unwrap_or("") != digest {
            return Err(Error::ChecksumFailed);
        }
        Ok(())
    }

    /// Content-addressed convenience wrapper: digests `content`, yielding
    /// once first so hashing megabytes doesn't starve the scheduler, then
    /// delegates to [`Endpoint::write_entire_file_from_buffer`].
    pub async fn write_entire_file(&self, bucket: &str, object: &str, content: Bytes) -> Result<(), Error> {
        tokio::task::yield_now().await;
        self.write_entire_file_from_buffer(bucket, object, content).await
    }

    /// `POST /B/O?uploads`; success `{200}`; extracts `<UploadId>`.
    pub async fn begin_multi_part_upload(&self, bucket: &str, object: &str) -> Result<String, Error> {
        let resource = format!("{}?uploads", object_resource(bucket, object));
        let response = self
            .do_request("POST", &resource, HeaderList::new(), None, &[200], false)
            .await?;
        let body = String::from_utf8_lossy(&response.content);
        xml::extract_upload_id(&body)
    }

    /// `PUT /B/O?partNumber=N&uploadId=U` with a `Content-MD5` digest;
    /// success `{200}`. Acquires the `concurrent_uploads` gate; returns the
    /// server's `ETag`.
    pub async fn upload_part(
        &self,
        bucket: &str,
        object: &str,
        part_number: u32,
        upload_id: &str,
        content: Bytes,
    ) -> Result<String, Error> {
        let digest = digest::md5_base64(&content);
        let mut headers = HeaderList::new();
        headers.set("Content-MD5", digest.clone());

        let resource = format!(
            "{}?partNumber={part_number}&uploadId={}",
            object_resource(bucket, object),
            urlencoding::encode(upload_id)
        );
        let response = self
            .do_request("PUT", &resource, headers, Some(content), &[200], true)
            .await?;

        if response.header("Content-MD5").unwrap_or("") != digest {
            return Err(Error::ChecksumFailed);
        }

        let etag = response.header("ETag").unwrap_or("").to_string();
        if etag.is_empty() {
            return Err(Error::HttpBadResponse("response carried no ETag".to_string()));
        }
        Ok(etag)
    }

    /// `POST /B/O?uploadId=U` with a `<CompleteMultipartUpload>` body whose
    /// `<Part>` entries appear in `parts`' order; success `{200}`.
    pub async fn finish_multi_part_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        parts: &[(u32, String)],
    ) -> Result<(), Error> {
        let body = xml::complete_multipart_upload_body(parts);
        let resource = format!(
            "{}?uploadId={}",
            object_resource(bucket, object),
            urlencoding::encode(upload_id)
        );
        self.do_request(
            "POST",
            &resource,
            HeaderList::new(),
            Some(Bytes::from(body)),
            &[200],
            false,
        )
        .await?;
        Ok(())
    }

    /// `GET /B/?max-keys=1000[&prefix][&delimiter]&marker=...` in a loop
    /// while `truncated`; success `{200}`. Each page is handed to
    /// `on_page` in server order; any parse failure raises
    /// [`Error::HttpBadResponse`] and terminates the stream.
    ///
    /// The page shape carries no `marker` field of its own (only `results`/
    /// `CommonPrefixes`/`truncated`), so the next marker is derived the
    /// standard S3 way: the last object name returned by this page. A
    /// `truncated` page with no objects has nothing to derive a marker from
    /// and ends the stream rather than looping forever on the same query.
    pub async fn list_bucket_stream<F>(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        mut on_page: F,
    ) -> Result<(), Error>
    where
        F: FnMut(ListResult) -> Result<(), Error>,
    {
        let mut base = format!("/{bucket}/?max-keys=1000");
        if let Some(p) = prefix {
            base.push_str(&format!("&prefix={}", urlencoding::encode(p)));
        }
        if let Some(d) = delimiter {
            base.push_str(&format!("&delimiter={}", urlencoding::encode(d)));
        }

        let mut marker = String::new();
        loop {
            let resource = format!("{base}&marker={}", urlencoding::encode(&marker));
            let response = self
                .do_request("GET", &resource, HeaderList::new(), None, &[200], false)
                .await?;
            let page = list::parse_page(&response.content)?;
            let next_marker = page.result.objects.last().map(|o| o.name.clone());
            on_page(page.result)?;

            if !page.truncated {
                break;
            }
            match next_marker {
                Some(m) => marker = m,
                None => break,
            }
        }
        Ok(())
    }

    /// Drains [`Endpoint::list_bucket_stream`] and concatenates all pages
    /// in arrival order.
    pub async fn list_bucket(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
    ) -> Result<ListResult, Error> {
        let mut all = ListResult::default();
        self.list_bucket_stream(bucket, prefix, delimiter, |page| {
            all.extend(page);
            Ok(())
        })
        .await?;
        Ok(all)
    }
}
