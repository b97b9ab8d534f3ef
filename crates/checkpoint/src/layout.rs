use ny_store::{CollectionPath, DocPath};

pub(crate) fn thread_doc(thread_id: &str) -> DocPath {
    CollectionPath::root("checkpoints").doc(thread_id)
}

pub(crate) fn namespace_doc(thread_id: &str, namespace: &str) -> DocPath {
    thread_doc(thread_id)
        .collection("checkpoint_namespaces")
        .doc(namespace)
}

pub(crate) fn checkpoints(thread_id: &str, namespace: &str) -> CollectionPath {
    namespace_doc(thread_id, namespace).collection("checkpoints")
}

pub(crate) fn blob_doc(thread_id: &str, namespace: &str, channel: &str, version: &str) -> DocPath {
    namespace_doc(thread_id, namespace)
        .collection("blobs")
        .doc(format!("{channel}_{version}"))
}

pub(crate) fn write_items(thread_id: &str, namespace: &str, checkpoint_id: &str) -> CollectionPath {
    namespace_doc(thread_id, namespace)
        .collection("writes")
        .doc(checkpoint_id)
        .collection("items")
}
