use crate::domain::earning::Remittance;
use crate::domain::money::Money;
use crate::domain::request::Request;
use crate::error::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::io::Write;

const REQUEST_HEADERS: [&str; 6] = ["request", "customer", "status", "bill_amount", "service_fee", "total"];
const REMITTANCE_HEADERS: [&str; 7] = [
    "rider",
    "date",
    "tasks",
    "service_fee",
    "rider_share",
    "platform_share",
    "status",
];

#[derive(Debug, Serialize)]
struct RequestRow<'a> {
    request: u32,
    customer: u32,
    status: &'a str,
    bill_amount: Money,
    service_fee: Money,
    total: Money,
}

#[derive(Debug, Serialize)]
struct RemittanceRow<'a> {
    rider: u32,
    date: NaiveDate,
    tasks: u32,
    service_fee: Money,
    rider_share: Money,
    platform_share: Money,
    status: &'a str,
}

/// Writes end-of-run CSV reports. Each section carries its own header line.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(sink);
        Self { writer }
    }

    pub fn write_requests(&mut self, requests: &[Request]) -> Result<()> {
        self.writer.write_record(REQUEST_HEADERS)?;
        for request in requests {
            self.writer.serialize(RequestRow {
                request: request.id(),
                customer: request.customer_id(),
                status: request.status().as_str(),
                bill_amount: request.bill_amount(),
                service_fee: request.service_fee(),
                total: request.total(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_remittances(&mut self, remittances: &[Remittance]) -> Result<()> {
        self.writer.write_record(REMITTANCE_HEADERS)?;
        for remittance in remittances {
            self.writer.serialize(RemittanceRow {
                rider: remittance.rider_id(),
                date: remittance.remittance_date(),
                tasks: remittance.total_tasks(),
                service_fee: remittance.total_service_fee(),
                rider_share: remittance.rider_share(),
                platform_share: remittance.platform_share(),
                status: remittance.status().as_str(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::tests::draft;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_report() {
        let request = Request::open(3, 10, draft(dec!(1000), dec!(50)), Utc::now()).unwrap();
        let mut out = Vec::new();
        {
            let mut writer = ReportWriter::new(&mut out);
            writer.write_requests(&[request]).unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "request,customer,status,bill_amount,service_fee,total\n3,10,pending,1000.00,50.00,1050.00\n"
        );
    }

    #[test]
    fn test_empty_remittance_report_has_header() {
        let mut out = Vec::new();
        ReportWriter::new(&mut out).write_remittances(&[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "rider,date,tasks,service_fee,rider_share,platform_share,status\n"
        );
    }
}
