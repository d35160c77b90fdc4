#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;

/// One paragraph of a generated `.docx`: an optional style id and its text.
pub type Para<'a> = (Option<&'a str>, &'a str);

pub fn docx(paragraphs: &[Para], tables: &[Vec<Vec<&str>>]) -> Vec<u8> {
    let mut body = String::new();
    for (style, text) in paragraphs {
        body.push_str("<w:p>");
        if let Some(style) = style {
            body.push_str(&format!("<w:pPr><w:pStyle w:val=\"{}\"/></w:pPr>", style));
        }
        body.push_str(&format!(
            "<w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>",
            text
        ));
    }
    for table in tables {
        body.push_str("<w:tbl>");
        for row in table {
            body.push_str("<w:tr>");
            for cell in row {
                body.push_str(&format!(
                    "<w:tc><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:tc>",
                    cell
                ));
            }
            body.push_str("</w:tr>");
        }
        body.push_str("</w:tbl>");
    }

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

pub const SALES_DOC: &str = "funnel_ventas.docx";
pub const SUPPLY_DOC: &str = "documentacion_compras_mx.docx";
pub const BOOKINGS_DOC: &str = "atribucion_reservas.docx";

/// Writes three analytics documents (sales, supply, bookings) into `dir`.
pub fn write_fixture_docs(dir: &Path) {
    fs::create_dir_all(dir).unwrap();

    fs::write(
        dir.join(SALES_DOC),
        docx(
            &[
                (Some("Title"), "Funnel de Ventas"),
                (None, "Documentación del funnel comercial."),
                (Some("Heading1"), "KPIs"),
                (None, "Leads generados, oportunidades abiertas y tasa de cierre."),
                (Some("Heading1"), "Consultas SQL"),
                (None, "SELECT lead_id, etapa FROM ventas.funnel;"),
            ],
            &[vec![
                vec!["KPI", "Definición"],
                vec!["Leads", "Prospectos nuevos en el periodo"],
                vec!["Tasa de cierre", "Oportunidades ganadas / abiertas"],
            ]],
        ),
    )
    .unwrap();

    fs::write(
        dir.join(SUPPLY_DOC),
        docx(
            &[
                (Some("Ttulo"), "Documentación de Compras MX"),
                (Some("Ttulo1"), "Etapas"),
                (None, "Inspección, oferta y adquisición del auto."),
                (Some("Ttulo1"), "Métricas"),
                (None, "Autos adquiridos por semana."),
            ],
            &[],
        ),
    )
    .unwrap();

    fs::write(
        dir.join(BOOKINGS_DOC),
        docx(
            &[
                (Some("Title"), "Atribución de Reservas"),
                (Some("Heading1"), "Modelo"),
                (None, "Cada reserva se atribuye al último canal."),
            ],
            &[],
        ),
    )
    .unwrap();
}
